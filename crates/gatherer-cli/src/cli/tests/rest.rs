//! Tests for status, show, retry, ack, sources, fingerprint, completions, manpage.

use super::parse;
use crate::cli::CliCommand;
use clap_complete::Shell;

#[test]
fn cli_parse_status() {
    match parse(&["gatherer", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_show() {
    match parse(&["gatherer", "show", "4f1c"]) {
        CliCommand::Show { id } => assert_eq!(id, "4f1c"),
        _ => panic!("expected Show"),
    }
}

#[test]
fn cli_parse_retry() {
    match parse(&["gatherer", "retry", "abc"]) {
        CliCommand::Retry { id } => assert_eq!(id, "abc"),
        _ => panic!("expected Retry"),
    }
}

#[test]
fn cli_parse_ack() {
    match parse(&["gatherer", "ack", "abc"]) {
        CliCommand::Ack { id } => assert_eq!(id, "abc"),
        _ => panic!("expected Ack"),
    }
}

#[test]
fn cli_parse_sources() {
    match parse(&["gatherer", "sources"]) {
        CliCommand::Sources => {}
        _ => panic!("expected Sources"),
    }
}

#[test]
fn cli_parse_fingerprint() {
    match parse(&["gatherer", "fingerprint", "/tmp/a.jpg"]) {
        CliCommand::Fingerprint { path } => assert_eq!(path, std::path::PathBuf::from("/tmp/a.jpg")),
        _ => panic!("expected Fingerprint"),
    }
}

#[test]
fn cli_parse_completions() {
    match parse(&["gatherer", "completions", "zsh"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, Shell::Zsh),
        _ => panic!("expected Completions"),
    }
}

#[test]
fn cli_parse_manpage() {
    match parse(&["gatherer", "manpage"]) {
        CliCommand::Manpage => {}
        _ => panic!("expected Manpage"),
    }
}

#[test]
fn cli_definition_is_consistent() {
    use clap::CommandFactory;
    crate::cli::Cli::command().debug_assert();
}
