pub mod ct;
pub mod hash;
pub mod init_data;
pub mod nonce;

pub use ct::{ct_eq, ct_eq_str};
pub use hash::{from_hex, hmac_sha256, sha256, to_hex};
pub use init_data::{verify_init_data, InitDataError, VerifiedInitData};
pub use nonce::nonce;
