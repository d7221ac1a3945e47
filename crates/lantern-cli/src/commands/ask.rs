//! Free-form questions, optionally about a file.

use std::path::Path;

use lantern_ai::Stage;
use miette::{IntoDiagnostic, WrapErr};

use crate::session::{report, Session};

pub(crate) fn run(question: &str, context: Option<&Path>) -> miette::Result<()> {
    let context = match context {
        Some(path) => {
            let bytes = std::fs::read(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => None,
    };

    let mut session = Session::new()?;
    let router = session.router().clone();
    let question = question.to_string();

    let ticket = session.submit("question", move |reporter| async move {
        reporter.stage(Stage::Prepared);
        reporter.stage(Stage::Running);
        let text = router.ask(&question, context.as_deref()).await?;
        reporter.stage(Stage::Formatting);
        Ok(text.trim().to_string())
    })?;

    let outcomes = session.wait(&[ticket]);
    report(outcomes, false)
}
