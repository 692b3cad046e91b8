/// Opaque container handle, analogous to `daos_handle_t` for an open
/// container. Carried by value; the VOS/placement traits interpret it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerHandle(pub u64);

/// Opaque pool handle, used by local (single-engine) transactions which
/// have no container context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolHandle(pub u64);
