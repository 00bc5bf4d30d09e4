use clap::Parser;
use pog_cache::cli::{Args, Command};
use pog_cache::{Config, LogLevel};
use std::path::PathBuf;

#[test]
fn debug_flag_wins_over_log_level() {
    let args = Args::parse_from(["pog_cache", "--debug", "--log-level", "quiet"]);
    assert_eq!(args.effective_log_level(), Some(LogLevel::Debug));

    let args = Args::parse_from(["pog_cache", "--log-level", "info"]);
    assert_eq!(args.effective_log_level(), Some(LogLevel::Info));

    let args = Args::parse_from(["pog_cache", "--log-level", "loud"]);
    assert_eq!(args.effective_log_level(), None);
}

#[test]
fn unset_flags_keep_config_values() {
    let args = Args::parse_from(["pog_cache", "list"]);
    let mut cfg = Config::new("/from/config");
    cfg.log_level = LogLevel::Info;
    args.apply_overrides(&mut cfg);
    assert_eq!(cfg.cache_root, PathBuf::from("/from/config"));
    assert_eq!(cfg.log_level, LogLevel::Info);
}

#[test]
fn subcommands_parse() {
    let args = Args::parse_from(["pog_cache", "recover", "/pkgs/tool"]);
    assert_eq!(args.command, Some(Command::Recover { package_dir: PathBuf::from("/pkgs/tool") }));
    let args = Args::parse_from(["pog_cache", "clear"]);
    assert_eq!(args.command, Some(Command::Clear { days: 0, before: None, force: false }));
    assert!(Args::try_parse_from(["pog_cache", "delete"]).is_err());
}
