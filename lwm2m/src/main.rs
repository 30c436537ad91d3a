//! LwM2M test server
//!
//! Runs the bootstrap and registration servers and an interactive shell
//! for issuing device operations against the connected clients.

use anyhow::Context;
use clap::Parser;
use lwm2m::cli::Args;
use lwm2m::completion::ShellHelper;
use lwm2m::shell::{Command, HELP, Shell};
use lwm2m_server::{BootstrapServer, RegistrationServer};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log level: {}", args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.server_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let bootstrap = BootstrapServer::new(config.bootstrap, config.operations.clone());
    let registration = RegistrationServer::new(config.registration, config.operations);

    runtime.block_on(async {
        bootstrap.start().await?;
        registration.start().await?;
        anyhow::Ok(())
    })?;

    let shell = Shell::new(bootstrap.operations().clone(), registration.operations().clone());
    let result = run_shell(&runtime, &shell);

    runtime.block_on(async {
        bootstrap.stop().await;
        registration.stop().await;
    });
    result
}

fn run_shell(runtime: &tokio::runtime::Runtime, shell: &Shell) -> anyhow::Result<()> {
    let mut rl = Editor::<ShellHelper, DefaultHistory>::new()?;
    rl.set_helper(Some(ShellHelper::new(
        runtime.handle().clone(),
        shell.clone(),
    )));
    println!("lwm2m Test Server");

    loop {
        match rl.readline(">>> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match Command::parse(trimmed) {
                    Ok(Command::Empty) => {}
                    Ok(Command::Help) => println!("{}", HELP),
                    Ok(Command::Exit) => break,
                    Ok(Command::Device(target, verb)) => {
                        match runtime.block_on(shell.execute(target, verb)) {
                            Ok(Some(output)) => println!("{}", output),
                            Ok(None) => {}
                            Err(e) => eprintln!("Error: {}", e),
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or exit to quit)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::error!("readline error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
