pub mod entry;
pub mod nrt;
pub mod rtp;

pub use entry::{GroupEntryNrt, GroupEntryRtp, GroupPairNrt, NrtUpdate};
pub use nrt::GroupNrtStore;
pub use rtp::GroupRtpStore;
