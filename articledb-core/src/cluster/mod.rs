pub mod membership;
pub mod node_meta;
pub mod registry;
pub mod resolver;

pub use membership::{Member, MembershipEvent};
pub use node_meta::{NodeMeta, PROTOCOL_TCP};
pub use registry::{Dialer, NodeRegistry, PeerInfo};
pub use resolver::{ClusterResolver, ClusteredBlobService};
