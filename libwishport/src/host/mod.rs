mod traits;

pub use traits::{AppHost, BoundaryContext, FileHost, PortHost, RelayHost, ResolverHost, SocketHost};
