//! Validate command - load a playbook without running it

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use super::{require_file, CommandContext};
use crate::playbook::{Playbook, Resolve};

/// Arguments for validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Playbook file to validate
    pub playbook: PathBuf,

    /// Extra directories to search for modules
    #[arg(short = 'M', long = "module-path", action = clap::ArgAction::Append)]
    pub module_path: Vec<PathBuf>,
}

impl ValidateArgs {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        require_file(&self.playbook)?;
        let catalog = ctx.module_catalog(&self.module_path);
        let book = match Playbook::load(&self.playbook, &catalog) {
            Ok(book) => book,
            Err(e) => {
                eprintln!("ERROR! {}", e);
                return Ok(e.exit_code());
            }
        };

        for line in summary(&book) {
            println!("{}", line);
        }
        Ok(0)
    }
}

/// One line per play: name, host patterns, task and handler counts.
pub fn summary(book: &Playbook) -> Vec<String> {
    book.plays()
        .iter()
        .map(|&play| {
            let hosts = book.entity_ref(play).get_string_list("hosts").join(",");
            let handlers: usize = book
                .handler_blocks(play)
                .iter()
                .map(|&block| {
                    let mut out = Vec::new();
                    book.collect_tasks(block, &mut out);
                    out.len()
                })
                .sum();
            format!(
                "play '{}' hosts={} tasks={} handlers={}",
                book.name(play),
                hosts,
                book.tasks_of(play).len(),
                handlers
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::ModuleCatalog;

    #[test]
    fn test_summary() {
        let yaml = r#"
- name: web
  hosts: web
  tasks:
    - command: /bin/true
    - block:
        - debug:
      rescue:
        - debug:
  handlers:
    - name: restart
      debug:
"#;
        let book = Playbook::from_yaml_str(yaml, &ModuleCatalog::builtin()).unwrap();
        assert_eq!(summary(&book), vec!["play 'web' hosts=web tasks=3 handlers=1"]);
    }
}
