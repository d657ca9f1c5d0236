pub mod compile;
pub mod inspect;
pub mod summarize;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::compile::ProductOutcome;

pub use compile::compile;
pub use inspect::inspect;
pub use summarize::summarize;

/// Name and outcome of every product of a run.
pub type Report = Vec<(String, ProductOutcome)>;

fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))
}

/// Runs one product, turning its error into a [`ProductOutcome::Failed`] so
/// the rest of the batch carries on.
fn isolate(name: &str, run: impl FnOnce() -> Result<ProductOutcome>) -> (String, ProductOutcome) {
    let outcome = run().unwrap_or_else(|e| {
        error!(product = name, "{e:#}");
        ProductOutcome::Failed {
            reason: format!("{e:#}"),
        }
    });
    info!(product = name, %outcome, "product done");

    (name.to_string(), outcome)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use anyhow::bail;

    use super::*;

    #[test]
    fn should_turn_errors_into_failed_outcomes() {
        let (name, outcome) = isolate("pr_rcp85", || bail!("chunk 3 is corrupt"));
        assert_eq!(name, "pr_rcp85");
        assert_eq!(
            outcome,
            ProductOutcome::Failed {
                reason: "chunk 3 is corrupt".to_string()
            }
        );

        let (_, outcome) = isolate("pr_rcp45", || Ok(ProductOutcome::Skipped));
        assert!(!outcome.is_failure());
    }
}
