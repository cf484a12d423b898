//! The `run` and `validate` commands against real files and the local
//! transport.

use clap::Parser;
use playengine::cli::commands::run::{parse_extra_vars, RunArgs};
use playengine::cli::commands::validate::ValidateArgs;
use playengine::cli::commands::CommandContext;
use playengine::cli::{Cli, Commands};
use playengine::config::Config;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn context() -> CommandContext {
    CommandContext {
        config: Config::default(),
        verbosity: 0,
        no_color: true,
    }
}

fn run_args(dir: &TempDir, playbook: &str, extra: &[&str]) -> RunArgs {
    let path = dir.path().join("site.yml");
    std::fs::write(&path, playbook).unwrap();
    let mut argv = vec!["playengine".to_string(), "run".to_string(), path.display().to_string()];
    argv.extend(extra.iter().map(|s| s.to_string()));
    match Cli::try_parse_from(argv).unwrap().command {
        Commands::Run(args) => args,
        other => panic!("unexpected command {:?}", other),
    }
}

#[tokio::test]
async fn test_run_local_playbook_succeeds() {
    let dir = TempDir::new().unwrap();
    let args = run_args(
        &dir,
        r#"
- hosts: localhost
  gather_facts: false
  tasks:
    - name: say hello
      command: echo {{ greeting }}
      register: out
    - assert:
        that:
          - out.rc == 0
          - out.stdout == 'hello'
"#,
        &["-e", "greeting=hello"],
    );

    assert_eq!(args.execute(&context()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_host_exit_code() {
    let dir = TempDir::new().unwrap();
    let args = run_args(
        &dir,
        "- hosts: localhost\n  gather_facts: false\n  tasks:\n    - fail:\n        msg: stop\n",
        &[],
    );

    assert_eq!(args.execute(&context()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_malformed_playbook_exit_code() {
    let dir = TempDir::new().unwrap();
    let args = run_args(&dir, "- hosts: localhost\n  taks: []\n", &[]);

    assert_eq!(args.execute(&context()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_playbook_is_an_error() {
    let args = RunArgs::try_parse_from(["run", "/nonexistent/site.yml"]).unwrap();
    assert!(args.execute(&context()).await.is_err());
}

#[tokio::test]
async fn test_validate_command() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("site.yml");
    std::fs::write(&path, "- hosts: all\n  tasks:\n    - ping:\n").unwrap();

    let args = ValidateArgs::try_parse_from(["validate", path.to_str().unwrap()]).unwrap();
    assert_eq!(args.execute(&context()).await.unwrap(), 0);
}

#[test]
fn test_play_context_from_flags() {
    let dir = TempDir::new().unwrap();
    let args = run_args(
        &dir,
        "- hosts: all\n  tasks: []\n",
        &["-t", "web,db", "-u", "deploy", "--force-handlers", "-e", "{\"n\": 3}"],
    );
    let ctx = args.play_context(&context()).unwrap();

    assert_eq!(ctx.only_tags, vec!["web", "db"]);
    assert_eq!(ctx.remote_user.as_deref(), Some("deploy"));
    assert!(ctx.force_handlers);
    assert_eq!(ctx.extra_vars["n"], json!(3));
    assert_eq!(ctx.connection, None);
}

#[test]
fn test_later_extra_vars_win() {
    let vars = parse_extra_vars(&["a=1 b=x".to_string(), "a=2".to_string()]).unwrap();
    assert_eq!(vars["a"], json!(2));
    assert_eq!(vars["b"], json!("x"));
}
