use std::path::{Path, PathBuf};

/// Builds the two shell commands of a provisioning run.
#[derive(Debug, Clone)]
pub struct AutomationCommands {
    pub ansible: String,
    pub ansible_playbook: String,
    pub user: String,
    /// Playbook root; the apply stage runs from here so relative roles resolve.
    pub recipe_dir: PathBuf,
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl AutomationCommands {
    /// Stage 1: set the target's hostname through an ad-hoc shell module call.
    pub fn rename(&self, address: &str, inventory: &Path, hostname: &str) -> String {
        format!(
            "{} -u {} {} -i {} -m shell -a 'hostnamectl set-hostname {}'",
            shell_quote(&self.ansible),
            shell_quote(&self.user),
            address,
            shell_quote(&inventory.to_string_lossy()),
            hostname,
        )
    }

    /// Stage 2: run the playbook against the group and keep a copy of the
    /// output in `log`. `pipefail` makes the playbook's status, not `tee`'s,
    /// the status of the command.
    pub fn apply(&self, recipe: &Path, inventory: &Path, group: &str, log: &Path) -> String {
        format!(
            "set -o pipefail; cd {} && {} {} -i {} -e hosts={} 2>&1 | tee {}",
            shell_quote(&self.recipe_dir.to_string_lossy()),
            shell_quote(&self.ansible_playbook),
            shell_quote(&recipe.to_string_lossy()),
            shell_quote(&inventory.to_string_lossy()),
            group,
            shell_quote(&log.to_string_lossy()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> AutomationCommands {
        AutomationCommands {
            ansible: "ansible".to_owned(),
            ansible_playbook: "ansible-playbook".to_owned(),
            user: "root".to_owned(),
            recipe_dir: PathBuf::from("/etc/ansible"),
        }
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn rename_command_shape() {
        let cmd = commands().rename(
            "10.1.2.3",
            Path::new("/var/log/hg/inv.txt"),
            "prod-goods-ms-001",
        );
        assert_eq!(
            cmd,
            "'ansible' -u 'root' 10.1.2.3 -i '/var/log/hg/inv.txt' -m shell \
             -a 'hostnamectl set-hostname prod-goods-ms-001'"
        );
    }

    #[test]
    fn apply_command_shape() {
        let cmd = commands().apply(
            Path::new("/etc/ansible/prod-goods-ms.yml"),
            Path::new("/var/log/hg/inv.txt"),
            "prod-goods-ms",
            Path::new("/var/log/hg/inv__ts.log"),
        );
        assert!(cmd.starts_with("set -o pipefail; cd '/etc/ansible' && 'ansible-playbook' "));
        assert!(cmd.contains("-e hosts=prod-goods-ms 2>&1 | tee '/var/log/hg/inv__ts.log'"));
    }
}
