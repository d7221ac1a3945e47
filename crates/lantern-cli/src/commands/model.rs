//! Local model management commands.

use lantern_ai::{local_ai_paths, ProgressFn, Stage};

use crate::session::{report, Session};

/// List registered models, marking installed ones and the active one.
pub(crate) fn list() -> miette::Result<()> {
    let mut session = Session::new()?;
    let router = session.router().clone();

    let ticket = session.submit("model list", move |reporter| async move {
        reporter.stage(Stage::Running);
        let models = router.list_models().await;
        let active = router.engine_status().await.ok().map(|s| s.model_id);
        reporter.stage(Stage::Formatting);

        if models.is_empty() {
            return Ok("No models registered.".to_string());
        }

        let mut out = String::from("Available models:\n");
        for (index, model) in models.iter().enumerate() {
            let marker = if active.as_deref() == Some(model.id.as_str()) {
                "*"
            } else {
                " "
            };
            let installed = if router.is_installed(model) {
                "installed"
            } else {
                "not downloaded"
            };
            out.push_str(&format!(
                "{} {:>2}. {:<24} {} (~{} GB RAM, {})\n",
                marker, index + 1, model.id, model.name, model.recommended_ram_gb, installed
            ));
            if !model.description.is_empty() {
                out.push_str(&format!("       {}\n", model.description));
            }
        }
        out.push_str(&format!(
            "\nModels directory: {}\nSwitch with: lantern model use <id|number>",
            router.registry().models_dir().display()
        ));
        Ok(out)
    })?;

    let outcomes = session.wait(&[ticket]);
    report(outcomes, false)
}

/// Show paths, the llama-server binary, hardware and the active model.
pub(crate) fn info() -> miette::Result<()> {
    let mut session = Session::new()?;
    let router = session.router().clone();

    println!("Paths:");
    println!("  Config:    {}", local_ai_paths::config_dir().display());
    println!("  Settings:  {}", router.settings().path().display());
    println!("  Models:    {}", router.registry().models_dir().display());

    println!();
    match local_ai_paths::find_llama_server() {
        Some(path) => println!("llama-server: {}", path.display()),
        None => {
            println!("llama-server: not found");
            println!("  Install llama.cpp or set {}", local_ai_paths::LLAMA_SERVER_ENV);
        }
    }

    println!();
    println!("Provider: {}", router.effective_settings().provider);
    println!();

    let ticket = session.submit("model info", move |reporter| async move {
        reporter.stage(Stage::Running);
        let engine = match router.engine().await {
            Ok(engine) => engine,
            Err(e) => return Ok(format!("Local engine unavailable: {}", e)),
        };
        engine.reprobe_hardware().await;
        let status = engine.status().await;
        reporter.stage(Stage::Formatting);

        let mut out = match status.hardware.flatten() {
            Some(gpu) => format!("GPU: {} ({} MB)\n", gpu.name, gpu.memory_mb),
            None => "GPU: none detected, using CPU\n".to_string(),
        };
        out.push_str(&format!(
            "Local model: {} ({})\n  Path: {}",
            status.model_name,
            status.model_id,
            status.model_path.display()
        ));
        if !status.model_path.is_file() {
            out.push_str(&format!(
                "\n  Not downloaded. Run: lantern model pull {}",
                status.model_id
            ));
        }
        Ok(out)
    })?;

    let outcomes = session.wait(&[ticket]);
    report(outcomes, false)
}

/// Download `id`, or the active local model when no id is given.
pub(crate) fn pull(id: Option<&str>) -> miette::Result<()> {
    let mut session = Session::new()?;
    let router = session.router().clone();
    let id = id.map(str::to_string);
    let target = id.clone().unwrap_or_else(|| "active model".to_string());

    let ticket = session.submit(&target, move |reporter| async move {
        reporter.stage(Stage::Running);
        let on_progress = {
            let reporter = reporter.clone();
            move |downloaded: u64, total: u64| reporter.download(downloaded, total)
        };
        let progress: ProgressFn<'_> = &on_progress;
        let path = match id {
            Some(id) => router.download(&id, Some(progress)).await?,
            None => router.download_model(Some(progress)).await?,
        };
        reporter.stage(Stage::Formatting);
        Ok(format!("Model ready at {}", path.display()))
    })?;

    let outcomes = session.wait(&[ticket]);
    report(outcomes, false)
}

/// Switch the local model, downloading it first if needed.
pub(crate) fn select(id_or_index: &str) -> miette::Result<()> {
    let mut session = Session::new()?;
    let router = session.router().clone();
    let choice = id_or_index.to_string();

    let ticket = session.submit(id_or_index, move |reporter| async move {
        reporter.stage(Stage::Running);
        let on_progress = {
            let reporter = reporter.clone();
            move |downloaded: u64, total: u64| reporter.download(downloaded, total)
        };
        let progress: ProgressFn<'_> = &on_progress;
        let spec = router.select_local_model(&choice, Some(progress)).await?;
        reporter.stage(Stage::Formatting);
        Ok(format!("Local model set to {} ({})", spec.name, spec.id))
    })?;

    let outcomes = session.wait(&[ticket]);
    report(outcomes, false)
}
