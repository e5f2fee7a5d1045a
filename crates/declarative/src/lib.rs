//! # Declarative
//!
//! A convergence engine for declarative host configuration.
//!
//! Classes of resource declarations are compiled against host facts into a
//! catalog, ordered into a plan, and applied against live host state with
//! only the changes needed to reach the declared state.
//!
//! ## Core Concepts
//!
//! - **Facts**: read-only key/value data about the host ([`Facts`], [`FactProvider`])
//! - **Class**: a named group of resources that can contain or require other classes
//! - **Catalog**: the compiled graph of resources and ordering edges ([`Compiler`])
//! - **Plan**: a total order over the catalog ([`resolve`])
//! - **Run**: checking and applying each resource in plan order ([`apply`])
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ApplyOptions, Compiler, LogProgress, Providers, apply, manifest, resolve};
//!
//! let registry = manifest::load_registry([("base.toml", BASE_TOML)])?;
//! let catalog = Compiler::new(&registry, &facts).compile(&["profiles::base"])?;
//! let plan = resolve(&catalog)?;
//! let report = apply(&catalog, &plan, &Providers::from_host(&host), &ApplyOptions::default(), &mut LogProgress);
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The engine never touches the host directly. Everything goes through
//! injected capabilities:
//!
//! - [`PackageProvider`], [`ServiceProvider`], [`FileProvider`]: query and change state
//! - [`CommandRunner`]: runs exec bodies and guard commands
//! - [`ProgressCallback`]: receives progress updates
//!
//! `testing::FakeHost` implements all of them in memory. It is compiled for
//! this crate's tests and, for downstream tests, behind the `testing` feature.

pub mod catalog;
pub mod class;
pub mod compiler;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod facts;
pub mod manifest;
pub mod report;
pub mod resolver;
pub mod resource;
pub mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

// Re-export main types at crate root
pub use catalog::{Catalog, CatalogNode, CompiledClass, Edge, EdgeKind};
pub use class::{ClassDecl, ClassParams, ClassRegistry, ParamDecl, Relation, ResourceDecl};
pub use compiler::Compiler;
pub use context::{
    CommandPurpose, CommandRunner, CommandSpec, FileProvider, FileStatus, LogProgress,
    NoProgress, PackageProvider, PackageStatus, ProgressCallback, Providers, ServiceProvider,
    ServiceStatus,
};
pub use diff::{Change, CheckOutcome, DiffSummary, content_digest, unified_diff};
pub use error::{
    ApplyError, BlockedError, CheckError, CompileError, CycleError, Error, ManifestError,
    ResourceError, Result,
};
pub use executor::{ApplyOptions, CancelToken, Phase, apply};
pub use facts::{FactProvider, Facts, StaticFacts};
pub use report::{Counts, Outcome, ResourceReport, RunReport};
pub use resolver::{Plan, resolve};
pub use resource::{Resource, ResourceSpec};
pub use types::{AttrValue, Attributes, CommandResult, Reference, RelationKind, ResourceId, ResourceKind};

/// Compile, order, and apply in one call
///
/// Compile and cycle errors are returned before anything touches the host.
pub fn converge<S, P>(
    compiler: &Compiler<'_>,
    roots: &[S],
    host: &Providers<'_>,
    opts: &ApplyOptions,
    progress: &mut P,
) -> Result<RunReport>
where
    S: AsRef<str>,
    P: ProgressCallback,
{
    let catalog = compiler.compile(roots)?;
    let plan = resolve(&catalog)?;
    Ok(apply(&catalog, &plan, host, opts, progress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, debian_facts};

    const BASE: &str = r#"
[class]
name = "profiles::base"
supported_os = ["Debian"]

[[resource]]
type = "package"
title = "curl"
ensure = "present"

[[resource]]
type = "service"
title = "dphys-swapfile"
ensure = "stopped"
"#;

    #[test]
    fn test_converge_end_to_end() {
        let registry = manifest::load_registry([("base.toml", BASE)]).unwrap();
        let facts = debian_facts();
        let compiler = Compiler::new(&registry, &facts);
        let host = FakeHost::new().with_service("dphys-swapfile", true, true);
        let providers = Providers::from_host(&host);

        let report = converge(
            &compiler,
            &["profiles::base"],
            &providers,
            &ApplyOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(report.counts.changed, 2);
        assert_eq!(host.installed("curl").as_deref(), Some("1.0.0"));
        assert!(!host.service("dphys-swapfile").running);

        let again = converge(
            &compiler,
            &["profiles::base"],
            &providers,
            &ApplyOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(again.counts.unchanged, 2);
    }

    #[test]
    fn test_compile_error_aborts_before_apply() {
        let registry = manifest::load_registry([("base.toml", BASE)]).unwrap();
        let facts = Facts::new().with(facts::keys::OS_FAMILY, "Archlinux");
        let host = FakeHost::new();

        let err = converge(
            &Compiler::new(&registry, &facts),
            &["profiles::base"],
            &Providers::from_host(&host),
            &ApplyOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::UnsupportedPlatform { .. })));
        assert!(host.mutations().is_empty());
    }
}
