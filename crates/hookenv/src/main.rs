use anyhow::{Context, Result};
use hookenv::builder::HookEnvironmentBuilder;
use hookenv::environment::EnvironmentManager;
use hookenv::hook::{HookDescriptor, RepoDescriptor};
use hookenv::languages::Language;
use hookenv::store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Wires a single hook through the Environment Manager and prints the
/// resulting launch mapping, end to end, without any of the surrounding
/// config/git/hook-execution machinery.
fn demo_hook() -> (HookDescriptor, RepoDescriptor) {
    let hook = HookDescriptor {
        id: "example".to_string(),
        name: Some("example hook".to_string()),
        language: Language::System,
        language_version: None,
        additional_dependencies: vec![],
        args: vec![],
        file_pattern: None,
        stages: vec![],
        always_run: true,
        pass_filenames: false,
        minimum_pre_commit_version: None,
    };
    let repo = RepoDescriptor {
        url: RepoDescriptor::LOCAL.to_string(),
        revision: String::new(),
    };
    (hook, repo)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let store = Store::from_settings().context("failed to resolve the cache directory")?;
    let environment = EnvironmentManager::new(store);
    let builder = HookEnvironmentBuilder::new(&environment);

    let (hook, repo) = demo_hook();
    info!(hook = %hook.id, language = %hook.language, "setting up environment");

    let mapping = builder.build(&hook, &repo, None).await?;

    let mut vars: Vec<_> = mapping.into_iter().collect();
    vars.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (name, value) in vars {
        #[allow(clippy::print_stdout)]
        {
            println!("{name}={}", value.to_string_lossy());
        }
    }

    environment.close();
    Ok(())
}
