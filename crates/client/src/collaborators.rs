use std::collections::HashSet;

use convoy::{Notifier, RemotePose, Renderer, RosterEntry, Severity};

/// Stands in for a renderer by logging remote vehicles as they appear and
/// disappear.
#[derive(Debug, Default)]
pub struct LogRenderer {
    visible: HashSet<String>,
    frames: u64,
}

impl LogRenderer {
    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}

impl Renderer for LogRenderer {
    fn update_remote_entities(&mut self, poses: &[RemotePose]) {
        self.frames += 1;
        for remote in poses {
            if self.visible.insert(remote.id.clone()) {
                let p = remote.pose.position;
                log::info!("Now drawing {} at ({:.1}, {:.1}, {:.1})", remote.id, p.x, p.y, p.z);
            }
        }

        if self.frames % 300 == 0 {
            for remote in poses {
                log::debug!(
                    "{} at {:?} moving {:.1} u/s",
                    remote.id,
                    remote.pose.position,
                    remote.pose.velocity.length()
                );
            }
        }
    }

    fn remove_remote_entity(&mut self, id: &str) {
        if self.visible.remove(id) {
            log::info!("Stopped drawing {}", id);
        }
    }
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => log::info!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Error => log::error!("{}", message),
        }
    }

    fn refresh_roster(&mut self, entries: &[RosterEntry]) {
        if entries.is_empty() {
            log::info!("No other drivers");
            return;
        }

        let names: Vec<String> = entries
            .iter()
            .map(|e| format!("{} ({})", e.name, e.vehicle))
            .collect();
        log::info!("Drivers: {}", names.join(", "));
    }
}
