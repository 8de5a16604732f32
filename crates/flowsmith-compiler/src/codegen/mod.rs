//! Lowers a planned flow to a Python script or notebook
//! plus the companion secrets module.

pub mod imports;
pub mod literal;
pub mod names;
pub mod notebook;
pub mod program;
pub mod script;
pub mod secrets;

use tracing::debug;

use flowsmith_core::config::CompilerConfig;
use flowsmith_core::error::GenerationError;
use flowsmith_core::traits::SecretResolver;
use flowsmith_core::{Artifact, Flow, TargetForm};

use crate::sequencer::ExecutionPlan;

pub use program::{Program, Section, SectionKind};

/// Packages a notebook needs on top of the program's own to be executed
/// headless.
const NOTEBOOK_RUNTIME: &[&str] = &["ipykernel", "nbclient"];

/// Resolved secrets shorter than this are not searched for in the program;
/// short values match ordinary text.
const MIN_LEAK_CHECK_LEN: usize = 8;

/// Generate the artifact for `flow` in the requested form.
pub fn generate(
    flow: &Flow,
    plan: &ExecutionPlan,
    form: TargetForm,
    secrets: &dyn SecretResolver,
    config: &CompilerConfig,
) -> Result<Artifact, GenerationError> {
    let program = program::build(flow, plan, config)?;
    let secrets_file = secrets::render(flow, &program.slug, secrets)?;

    let embed_err = |reason: String| GenerationError::Embedding {
        entity: flow.id.clone(),
        field: "name".into(),
        reason,
    };
    let contents = match form {
        TargetForm::Script => script::render(&program).map_err(embed_err)?,
        TargetForm::Notebook => notebook::render(&program).map_err(embed_err)?,
    };

    for (entity, secret) in &secrets_file.resolved {
        if secret.chars().count() >= MIN_LEAK_CHECK_LEN && contents.contains(secret.as_str()) {
            return Err(GenerationError::SecretLeak {
                entity: entity.clone(),
            });
        }
    }

    let mut requirements = program.requirements.clone();
    if form == TargetForm::Notebook {
        requirements.extend(NOTEBOOK_RUNTIME.iter().map(|s| s.to_string()));
        requirements.sort();
        requirements.dedup();
    }

    debug!(
        flow_id = %flow.id,
        form = %form,
        bytes = contents.len(),
        requirements = requirements.len(),
        "Artifact generated"
    );
    Ok(Artifact {
        form,
        file_name: format!("{}.{}", program.slug, form.extension()),
        contents,
        secrets_file_name: format!("{}.py", program.secrets_module()),
        secrets: secrets_file.contents,
        requirements,
        credential_env: secrets_file.env_vars,
    })
}
