//! Task execution through the worker pool: ordering, concurrency, loops,
//! conditionals, retries and unreachable hosts.

mod common;

use std::time::Duration;

use common::*;
use playengine::executor::{QueueConfig, RunCode};
use pretty_assertions::assert_eq;
use serde_json::json;

const FOUR_TASKS: &str = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: first
      step:
        sleep_ms: 3
    - name: second
      step:
        change_on: [h2, h4]
    - name: third
      step:
        sleep_ms: 1
    - name: fourth
      step:
"#;

fn hosts(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("h{}", i)).collect()
}

#[tokio::test]
async fn test_per_host_order_does_not_depend_on_forks() {
    let expected: Vec<String> = ["first", "second", "third", "fourth"].iter().map(|s| s.to_string()).collect();
    let names = hosts(6);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    for forks in [1, 3, 8] {
        let harness = Harness::new(&refs).with_forks(forks);
        let run = harness.run(FOUR_TASKS).await;
        assert!(run.success(), "forks={}", forks);
        for host in &names {
            assert_eq!(harness.action.tasks_for(host), expected, "forks={} host={}", forks, host);
        }
        assert_eq!(harness.action.host_overlaps(), 0, "forks={}", forks);
    }
}

#[tokio::test]
async fn test_forks_bound_concurrency() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: slow
      step:
        sleep_ms: 20
"#;
    let names = hosts(6);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let harness = Harness::new(&refs).with_forks(2);
    harness.run(yaml).await;

    assert_eq!(harness.action.calls().len(), 6);
    assert!(harness.action.peak_concurrency() <= 2, "peak {}", harness.action.peak_concurrency());
    assert!(harness.action.peak_concurrency() >= 1);
}

#[tokio::test]
async fn test_stats_follow_results() {
    let names = hosts(4);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let harness = Harness::new(&refs);
    let run = harness.run(FOUR_TASKS).await;

    assert_eq!(stats_of(&run, "h1").ok, 4);
    assert_eq!(stats_of(&run, "h1").changed, 0);
    assert_eq!(stats_of(&run, "h2").ok, 4);
    assert_eq!(stats_of(&run, "h2").changed, 1);
    assert_eq!(run.stats.totals().changed, 2);
}

#[tokio::test]
async fn test_false_condition_skips_without_connecting() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: guarded
      step:
      when: inventory_hostname != 'down1'
"#;
    let harness = Harness::new(&["up1", "down1"]).with_down(&["down1"]);
    let run = harness.run(yaml).await;

    assert_eq!(harness.action.hosts_for("guarded"), vec!["up1".to_string()]);
    assert_eq!(stats_of(&run, "down1").skipped, 1);
    assert_eq!(stats_of(&run, "down1").unreachable, 0);
    assert!(run.success());
}

#[tokio::test]
async fn test_unreachable_host_is_dropped() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: one
      step:
    - name: two
      step:
- hosts: all
  gather_facts: false
  tasks:
    - name: three
      step:
"#;
    let harness = Harness::new(&["web1", "web2"]).with_down(&["web2"]);
    let run = harness.run(yaml).await;

    assert_eq!(run.code, RunCode::UnreachableHosts);
    assert_eq!(harness.action.tasks_for("web2"), Vec::<String>::new());
    assert_eq!(harness.action.tasks_for("web1"), vec!["one", "two", "three"]);
    assert_eq!(stats_of(&run, "web2").unreachable, 1);
    assert_eq!(
        harness.callback.results_for("web2"),
        vec![("one".to_string(), "unreachable".to_string())]
    );
}

#[tokio::test]
async fn test_ignore_unreachable() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: check
      step:
        unreachable_on: [web1]
      ignore_unreachable: true
    - name: after
      step:
"#;
    let harness = Harness::new(&["web1"]);
    let run = harness.run(yaml).await;

    assert!(run.success());
    assert_eq!(harness.action.tasks_for("web1"), vec!["check", "after"]);
    assert_eq!(stats_of(&run, "web1").ignored, 1);
}

#[tokio::test]
async fn test_loop_runs_once_per_item() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: each
      step:
      loop: [a, b, c]
      when: item != 'b'
      register: looped
"#;
    let harness = Harness::new(&["web1"]);
    harness.run(yaml).await;

    let items: Vec<_> = harness.action.calls().into_iter().map(|c| c.item).collect();
    assert_eq!(items, vec![Some(json!("a")), Some(json!("c"))]);

    let result = harness.callback.result("web1", "each").unwrap();
    let results = result.get("results").and_then(|r| r.as_array()).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[1]["skipped"], json!(true));
    assert_eq!(results[1]["item"], json!("b"));
}

#[tokio::test]
async fn test_until_exhausts_retries() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: flaky
      step:
        outcome: failed
      register: out
      until: not out.failed
      retries: 3
      delay: 0
"#;
    let harness = Harness::new(&["web1"]);
    let run = harness.run(yaml).await;

    assert_eq!(harness.action.calls().len(), 4);
    let result = harness.callback.result("web1", "flaky").unwrap();
    assert!(result.is_failed());
    assert_eq!(result.get("attempts"), Some(&json!(4)));
    assert_eq!(run.code, RunCode::FailedHosts);
}

#[tokio::test]
async fn test_until_stops_on_success() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: eventually
      step:
        sequence: [failed, failed, ok, failed]
      register: out
      until: not out.failed
      retries: 5
      delay: 0
"#;
    let harness = Harness::new(&["web1"]);
    let run = harness.run(yaml).await;

    assert_eq!(harness.action.calls().len(), 3);
    let result = harness.callback.result("web1", "eventually").unwrap();
    assert!(!result.is_failed());
    assert_eq!(result.get("attempts"), Some(&json!(3)));
    assert!(run.success());
}

#[tokio::test]
async fn test_failed_when_and_changed_when() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: judged
      step:
        outcome: changed
      register: out
      changed_when: false
      failed_when: out.attempt == 1
"#;
    let harness = Harness::new(&["web1"]);
    let run = harness.run(yaml).await;

    let result = harness.callback.result("web1", "judged").unwrap();
    assert!(result.is_failed());
    assert!(!result.is_changed());
    assert_eq!(stats_of(&run, "web1").failed, 1);
}

#[tokio::test]
async fn test_task_timeout_fails_the_task() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: hangs
      step:
        sleep_ms: 2000
"#;
    let harness = Harness::new(&["web1"]);
    let config = QueueConfig::default().with_task_timeout(Some(Duration::from_millis(50)));
    let run = harness
        .executor()
        .with_config(config)
        .run(Harness::playbook(yaml))
        .await
        .unwrap();

    assert_eq!(run.code, RunCode::FailedHosts);
    let result = harness.callback.result("web1", "hangs").unwrap();
    assert!(result.msg().unwrap_or("").contains("timed out"), "{:?}", result.msg());
}

#[tokio::test]
async fn test_extra_vars_override_play_vars() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  vars:
    color: red
  tasks:
    - name: show
      debug:
        msg: "{{ color }}"
"#;
    let harness = Harness::new(&["web1"]).with_context(|ctx| {
        ctx.extra_vars.insert("color".into(), json!("blue"));
    });
    harness.run(yaml).await;

    assert_eq!(harness.callback.result("web1", "show").unwrap().msg(), Some("blue"));
}

#[tokio::test]
async fn test_only_tags_selects_tasks() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: build
      step:
      tags: [build]
    - name: deploy
      step:
      tags: [deploy]
    - name: everywhere
      step:
      tags: [always]
"#;
    let harness = Harness::new(&["web1"]).with_context(|ctx| ctx.only_tags = vec!["deploy".into()]);
    harness.run(yaml).await;

    assert_eq!(harness.action.tasks_for("web1"), vec!["deploy", "everywhere"]);
}
