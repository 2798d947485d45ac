use anyhow::Context;
use clap::Parser;
use log::{error, info};
use rKind::{
    Engine,
    config::Config,
    frontend::{Frontend, TomlFrontend},
    portfolio::Portfolio,
    transys::property::PropStatus,
};
use std::{env, fs, process::exit};

fn main() -> anyhow::Result<()> {
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") };
    }
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();
    let mut cfg = Config::parse();
    if cfg.model.as_os_str() != "-" {
        cfg.model = cfg
            .model
            .canonicalize()
            .with_context(|| format!("cannot open {}", cfg.model.display()))?;
    }
    info!("the model to be checked: {}", cfg.model.display());
    if let Some(dir) = cfg.smt.trace.as_ref() {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create trace directory {}", dir.display()))?;
    }
    let frontend = TomlFrontend::new(&cfg)?;
    let ts = frontend.ts();
    if ts.props.is_empty() {
        error!("{} has no property to check", ts.name);
        exit(30);
    }
    let mut portfolio = Portfolio::new(cfg.clone(), ts);
    let ctrl = portfolio.get_ctrl();
    ctrlc::set_handler(move || ctrl.terminate()).context("cannot install the Ctrl-C handler")?;
    portfolio.check()?;
    portfolio.on_exit();

    let statuses = portfolio.statuses();
    let mut all_valid = true;
    let mut some_false = false;
    for (name, status) in statuses.iter() {
        match status {
            PropStatus::Invariant => println!("{name}: valid"),
            PropStatus::False(cex) => {
                some_false = true;
                println!("{name}: falsified at depth {}", cex.len());
                print!("{}", frontend.witness(name, cex));
            }
            PropStatus::KTrue(k) => println!("{name}: unknown, true up to depth {k}"),
            PropStatus::Unknown => println!("{name}: unknown"),
        }
        all_valid &= status.is_invariant();
    }
    exit(if some_false {
        10
    } else if all_valid {
        20
    } else {
        30
    })
}
