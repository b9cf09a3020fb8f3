pub mod suspicious_ip;
pub mod token_bucket;
pub mod velocity;

pub use suspicious_ip::{IpStatus, SuspiciousIpEntry, SuspiciousIpStore};
pub use token_bucket::{BucketParams, Decision as TokenBucketDecision, TokenBucketStore};
pub use velocity::{
    EventType, VelocityAction, VelocityChecker, VelocityConfig, VelocityDecision, VelocityEvent, VelocityFlag,
};
