//! Flow compiler: validate, sequence, generate, write.

pub mod codegen;
pub mod sequencer;
pub mod validator;
pub mod writer;

use std::path::Path;

use tracing::info;

use flowsmith_core::config::CompilerConfig;
use flowsmith_core::traits::SecretResolver;
use flowsmith_core::{Artifact, Flow, Result, TargetForm, WrittenArtifact};

pub use codegen::generate;
pub use sequencer::{plan, Branch, ExecutionPlan, GroupPlan, Invocation, NestedRegistration};
pub use validator::validate;
pub use writer::write_artifact;

/// Validate, plan and generate `flow` without touching the filesystem.
pub fn compile(
    flow: &Flow,
    form: TargetForm,
    secrets: &dyn SecretResolver,
    config: &CompilerConfig,
) -> Result<Artifact> {
    validate(flow).into_result()?;
    let plan = plan(flow)?;
    let artifact = generate(flow, &plan, form, secrets, config)?;
    info!(
        flow_id = %flow.id,
        file = %artifact.file_name,
        chats = plan.invocations.len(),
        "Flow compiled"
    );
    Ok(artifact)
}

/// Compile `flow` and write the artifact pair into `dir`.
pub fn compile_to(
    flow: &Flow,
    form: TargetForm,
    secrets: &dyn SecretResolver,
    config: &CompilerConfig,
    dir: &Path,
) -> Result<WrittenArtifact> {
    let artifact = compile(flow, form, secrets, config)?;
    write_artifact(&artifact, dir)
}
