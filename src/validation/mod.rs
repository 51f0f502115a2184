pub mod consistency_checker;
pub mod dependency_resolver;

pub use consistency_checker::{ConsistencyChecker, ConsistencyMode, ConsistencyReport};
pub use dependency_resolver::{DependencyResolver, LocalDependency, ResolvedDependencies};
