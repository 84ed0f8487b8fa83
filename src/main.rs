use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use agentd::compiler::{self, PLAN_SCHEME};
use agentd::config::Config;
use agentd::dispatch::Dispatcher;
use agentd::instruction::Metadata;
use agentd::{mermaid, server, trace};

/// agentd: route `llm://`, `tool://` and `plan://` instructions.
#[derive(Parser, Debug)]
#[command(name = "agentd")]
#[command(about = "Instruction router and plan runtime", long_about = None)]
struct Cli {
    /// Enable debug logging (otherwise AGENTD_LOG, default "warn")
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch one instruction and print its output
    Run {
        /// Instruction, e.g. `plan://A=tool://x;B<-A`
        instruction: String,

        /// Session id for `.memory` models
        #[arg(long, default_value = "")]
        session: String,

        /// Request metadata, repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,

        /// Path to agentd.yaml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the execution trace after the output
        #[arg(long)]
        trace: bool,

        /// Print `{content, trace}` as JSON instead of plain text
        #[arg(long)]
        json: bool,

        /// Print the plan as a Mermaid graph with skipped nodes dimmed
        #[arg(long)]
        mermaid: bool,
    },

    /// Compile a plan without running it
    Plan {
        plan: String,

        /// Print only the Mermaid graph
        #[arg(long)]
        mermaid: bool,

        /// Print only the topological order
        #[arg(long)]
        order: bool,
    },

    /// Start the HTTP gateway
    Serve {
        /// Listen address (defaults to server.bind from config)
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn print_error_chain(err: &anyhow::Error) {
    eprintln!("Error: {err}");

    let mut n = 0;
    let mut cur = err.source();
    while let Some(cause) = cur {
        eprintln!("  {n}: {cause}");
        n += 1;
        cur = cause.source();
    }
}

fn main() {
    if let Err(err) = real_main() {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("AGENTD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Command::Run {
            instruction,
            session,
            meta,
            config,
            trace: show_trace,
            json,
            mermaid: show_mermaid,
        } => {
            let cfg = Config::load(config.as_deref())?;
            let dispatcher = Dispatcher::from_config(&cfg)?;
            let meta: Metadata = meta.into_iter().collect();

            let out = dispatcher.dispatch(&session, &instruction, &meta);

            if json {
                let body = serde_json::json!({
                    "content": out.output,
                    "trace": out.trace,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }

            if show_mermaid {
                if instruction.starts_with(PLAN_SCHEME) {
                    let dag = compiler::compile_dag(&instruction);
                    print!("{}", mermaid::render_with_trace(&dag, &out.trace));
                } else {
                    eprintln!("--mermaid only applies to plan:// instructions");
                }
            }

            println!("{}", out.output);
            if show_trace {
                trace::print_trace(&out.trace);
            }
            Ok(())
        }
        Command::Plan {
            plan,
            mermaid: show_mermaid,
            order,
        } => {
            let compiled = compiler::compile(&plan);
            let dag = &compiled.dag;

            if show_mermaid {
                print!("{}", mermaid::render(dag));
                return Ok(());
            }
            if order {
                println!("{}", dag.topological_order().join(" "));
                return Ok(());
            }

            println!("plan nodes={}", dag.len());
            for node in dag.nodes() {
                if node.op.is_empty() {
                    println!("  {}", node.id);
                } else {
                    println!("  {} = {}", node.id, node.op);
                }
            }
            println!("edges:");
            for (parent, child) in dag.edges() {
                match dag.node(child).and_then(|c| c.conditions.get(parent)) {
                    Some(cond) => println!("  {parent} -> {child} ?{cond}"),
                    None => println!("  {parent} -> {child}"),
                }
            }
            println!("order: {}", dag.topological_order().join(" "));
            if dag.has_cycle() {
                println!("cycle: yes");
            }
            if !compiled.dropped.is_empty() {
                println!("dropped:");
                for frag in &compiled.dropped {
                    println!("  {frag:?}");
                }
            }
            Ok(())
        }
        Command::Serve { bind, config } => {
            let cfg = Config::load(config.as_deref())?;
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let dispatcher = Dispatcher::from_config(&cfg)?;
            eprintln!("agentd gateway listening on http://{bind}");
            server::run_server(&bind, cfg.server.workers, dispatcher)
                .with_context(|| format!("gateway at {bind} stopped"))
        }
    }
}
