use std::net::IpAddr;

/// A peer as seen by the membership layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub addr: IpAddr,
    /// Opaque advertised metadata, see [`super::NodeMeta`].
    pub meta: Vec<u8>,
}

/// Notifications delivered by whatever membership layer is plugged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(Member),
    Updated(Member),
    Left { name: String },
}

impl MembershipEvent {
    pub fn name(&self) -> &str {
        match self {
            MembershipEvent::Joined(member) | MembershipEvent::Updated(member) => &member.name,
            MembershipEvent::Left { name } => name,
        }
    }
}
