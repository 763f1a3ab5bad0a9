use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use reqwest::{Client, Url};
use tokio::runtime::Runtime;
use tokio::signal;

use pagedump::cli::{Cli, CommandFactory, Parser};
use pagedump::collector::{Collector, Strategy};
use pagedump::config::Config;
use pagedump::sink;

const SPINNER_FINISH_MODE: ProgressFinish = ProgressFinish::AndClear;
const SPINNER_TICK_SECS: f32 = 0.1;

#[inline]
fn build_spinner() -> ProgressBar {
    ProgressBar::new_spinner()
        .with_finish(SPINNER_FINISH_MODE)
        .with_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .unwrap()
                // For more spinners check out the cli-spinners project:
                // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
                // NOTE: use `ascii` only, because cmd/powershell maybe not support unicode.
                .tick_strings(&[".  ", ".. ", "...", " ..", "  .", "   "]),
        )
}

#[inline]
fn build_client(timeout: u64) -> reqwest::Result<Client> {
    let client_builder = Client::builder();
    let client_builder = if timeout > 0 {
        client_builder.timeout(Duration::from_secs(timeout))
    } else {
        client_builder
    };
    client_builder.build()
}

#[inline]
async fn async_main(config: Config, strategy: Strategy) -> anyhow::Result<()> {
    let client = build_client(config.timeout).context("failed to build reqwest client")?;
    // `config` has already been validated, so the URL must parse.
    let base = Url::parse(&config.base_url).expect("wrong config validator, please raise an issue");

    let timeout = (config.timeout > 0).then(|| Duration::from_secs(config.timeout));
    let collector = Collector::build(client, base, config.limit.get(), config.workers.get())
        .expect("wrong config parser, please raise an issue")
        .timeout(timeout);

    let spinner = build_spinner();
    spinner.set_message(format!(
        "Collecting items with the `{}` strategy...",
        strategy.suffix()
    ));
    spinner.enable_steady_tick(Duration::from_secs_f32(SPINNER_TICK_SECS));
    let items = collector
        .collect(strategy)
        .await
        .context("failed to collect items from the API")?;
    spinner.finish_with_message("Items collected successfully!");

    let output_path = config
        .output_dir
        .join(format!("{}_{}.json", config.output_prefix, strategy.suffix()));
    sink::save_to_file(&output_path, &items)
        .await
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    println!("Saved {} items to {}", items.len(), output_path.display());

    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // here, if parse fails, the program will be `abort`ed, and no `Drop` will be called,
    // but it's okay, because we don't need to clean up anything.
    let cli = Cli::parse();

    let config = match cli.config {
        Some(config) => config,
        None => match Cli::get_config_from_editor(&mut Cli::command()) {
            Ok(config) => config,
            // if we can't get the config from the editor, we drop the whole program.
            Err(err) => {
                let _ = err.print();
                return Ok(ExitCode::from(u8::try_from(err.exit_code()).unwrap()));
            }
        },
    };
    let strategy = match cli.strategy {
        Some(strategy) => strategy.into(),
        None => config.strategy,
    };

    let runtime = Runtime::new().context("failed to build tokio runtime")?;
    runtime.block_on(async {
        tokio::select! {
            result = async_main(config, strategy) => {result},
            result = signal::ctrl_c() => {
                result.expect("failed to listen for ctrl-c signal");
                println!("Ctrl-C received, exiting...");
                Ok(())
            },
        }
    })?;

    Ok(ExitCode::SUCCESS)
}
