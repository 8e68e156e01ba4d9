mod cli;
mod paths;
mod report;
mod run;
mod source;

use anyhow::{Context, Result};
use cli::{Command, DescribeArgs};
use paths::AppPaths;
use serde::Serialize;
use testdef::{CodecParams, TestDefinition};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Run(args) => run::run(args),
        Command::Describe(args) => run_describe(args),
        Command::Where => run_where(),
    }
}

#[derive(Serialize)]
struct Description<'a> {
    test: &'a TestDefinition,
    frame_size: u64,
    codec: CodecParams,
}

fn run_describe(args: DescribeArgs) -> Result<()> {
    let test = TestDefinition::load(&args.test)?.with_basic_defaults();
    let description = Description {
        test: &test,
        frame_size: test.frame_size(),
        codec: test.codec_params()?,
    };
    let json = if args.compact {
        serde_json::to_string(&description)
    } else {
        serde_json::to_string_pretty(&description)
    }
    .context("failed to serialize test description")?;
    println!("{json}");
    Ok(())
}

fn run_where() -> Result<()> {
    let paths = AppPaths::discover()?;
    println!("Directories:");
    println!("  data:       {}", paths.data_dir().display());
    println!("  reports:    {}", paths.report_dir().display());
    Ok(())
}
