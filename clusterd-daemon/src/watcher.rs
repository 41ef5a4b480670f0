//! Filesystem watcher: turns change notifications on watch-list paths into
//! `update1` commands sent to the dispatcher.
//!
//! Each active watch-list entry becomes one non-recursive
//! [`WatchRegistration`]. The `/etc/` entry is a directory watch kept only for
//! the credential file inside it, so events there are filtered by name.

use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use clusterd_core::{watch_list, FileId, WatchTarget};

use crate::client;
use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::paths;
use crate::protocol::Command;

/// Upper bound on simultaneously registered watch-list entries.
pub const MAX_WATCH_TARGETS: usize = 10;

/// Watch-list entry whose registration is the credential-file registration.
pub const CREDENTIAL_DIR: &str = "/etc/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    Generic,
    CredentialFile,
}

/// A watched path and the watch-list entry it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRegistration {
    pub target: WatchTarget,
    pub path: PathBuf,
    pub kind: RegistrationKind,
}

impl WatchRegistration {
    pub fn new(root: &Path, target: WatchTarget) -> Self {
        let resolved = paths::resolve_relative(root, &target.relative_path);
        let path = fs::canonicalize(&resolved).unwrap_or(resolved);
        let kind = if target.relative_path == CREDENTIAL_DIR {
            RegistrationKind::CredentialFile
        } else {
            RegistrationKind::Generic
        };
        Self { target, path, kind }
    }

    pub fn is_credential_registration(&self) -> bool {
        self.kind == RegistrationKind::CredentialFile
    }

    /// Name of `path` as seen by this registration: empty for the watched
    /// path itself, the file name for a direct child of a watched directory.
    pub fn event_name(&self, path: &Path) -> Option<String> {
        if path == self.path.as_path() {
            return Some(String::new());
        }
        if path.parent() == Some(self.path.as_path()) {
            return path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
        }
        None
    }

    /// Logical file id: the entry's relative path with the event name
    /// appended verbatim.
    pub fn file_id(&self, event_name: &str) -> FileId {
        FileId::from(format!("{}{}", self.target.relative_path, event_name))
    }
}

/// `true` when an event name under the credential registration refers to the
/// credential file.
pub fn matches_credential_name(event_name: &str, credential_file_name: &str) -> bool {
    event_name.contains(credential_file_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Modified,
    MovedIn,
    /// The kernel queue overflowed; some changes went unreported.
    Overflow,
    Other,
}

/// A notification reduced to what the watcher acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: Option<PathBuf>,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
        }
    }

    pub fn overflow() -> Self {
        Self {
            kind: WatchEventKind::Overflow,
            path: None,
        }
    }

    /// Split a notify event into one event per path.
    ///
    /// A paired rename is reported twice by the backend (`To`, then `Both`);
    /// only `To` counts as a move-in so the destination is not emitted twice.
    pub fn from_notify(event: Event) -> Vec<WatchEvent> {
        if event.need_rescan() {
            return vec![WatchEvent::overflow()];
        }
        let kind = match event.kind {
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                WatchEventKind::Modified
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::MovedIn,
            _ => WatchEventKind::Other,
        };
        event
            .paths
            .into_iter()
            .map(|path| WatchEvent::new(kind, path))
            .collect()
    }
}

/// What the watcher does with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Emit(Command),
    Overflow,
    /// Under the credential registration but not the credential file.
    Discarded,
    /// Matched a registration, but the kind is neither modify nor move-in.
    Ignored,
    /// No registration covers the event path.
    Unmatched,
}

/// Registration table built once at watcher startup.
#[derive(Debug, Clone)]
pub struct WatchTable {
    registrations: Vec<WatchRegistration>,
    credential_file_name: String,
}

impl WatchTable {
    /// Register `targets` under `root`, keeping at most [`MAX_WATCH_TARGETS`].
    pub fn build(
        root: &Path,
        targets: impl IntoIterator<Item = WatchTarget>,
        credential_file_name: impl Into<String>,
    ) -> Self {
        let mut registrations = Vec::new();
        for target in targets {
            if registrations.len() == MAX_WATCH_TARGETS {
                tracing::warn!(
                    path = %target.relative_path,
                    limit = MAX_WATCH_TARGETS,
                    "watch table full; not watching entry",
                );
                continue;
            }
            tracing::debug!(path = %target.relative_path, "adding file to watch list");
            registrations.push(WatchRegistration::new(root, target));
        }
        Self {
            registrations,
            credential_file_name: credential_file_name.into(),
        }
    }

    /// Load the watch list named by `config` and keep the entries active for
    /// its node role.
    pub fn from_config(config: &DaemonConfig) -> Result<Self, DaemonError> {
        let list = watch_list::load_at(&config.watch_list_path)?;
        let active = list
            .active_targets(&config.node_role)
            .into_iter()
            .cloned();
        Ok(Self::build(&config.root, active, config.credential_file_name.clone()))
    }

    pub fn registrations(&self) -> &[WatchRegistration] {
        &self.registrations
    }

    pub fn classify(&self, event: &WatchEvent) -> EventAction {
        if event.kind == WatchEventKind::Overflow {
            return EventAction::Overflow;
        }
        let Some(path) = event.path.as_deref() else {
            return EventAction::Unmatched;
        };
        let Some((registration, name)) = self.lookup(path) else {
            return EventAction::Unmatched;
        };

        if registration.is_credential_registration()
            && !matches_credential_name(&name, &self.credential_file_name)
        {
            return EventAction::Discarded;
        }

        match event.kind {
            WatchEventKind::Modified | WatchEventKind::MovedIn => EventAction::Emit(Command::Update1 {
                file_id: registration.file_id(&name),
            }),
            WatchEventKind::Overflow | WatchEventKind::Other => EventAction::Ignored,
        }
    }

    /// A file watched directly wins over the directory that contains it.
    fn lookup(&self, path: &Path) -> Option<(&WatchRegistration, String)> {
        if let Some(exact) = self.registrations.iter().find(|reg| reg.path.as_path() == path) {
            return Some((exact, String::new()));
        }
        self.registrations
            .iter()
            .find_map(|reg| reg.event_name(path).map(|name| (reg, name)))
    }

    fn register(&mut self, watcher: &mut impl Watcher) {
        self.registrations.retain(|reg| {
            match watcher.watch(&reg.path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(path = %reg.path.display(), kind = ?reg.kind, "watching");
                    true
                }
                Err(err) => {
                    tracing::error!(
                        path = %reg.path.display(),
                        error = %err,
                        "error setting watcher",
                    );
                    false
                }
            }
        });
    }

    fn unregister(&self, watcher: &mut impl Watcher) {
        for reg in &self.registrations {
            if let Err(err) = watcher.unwatch(&reg.path) {
                tracing::debug!(path = %reg.path.display(), error = %err, "unwatch failed");
            }
        }
    }
}

/// Run the watcher until shutdown or a fatal error. Watches are removed
/// before returning either way.
pub async fn run(
    config: DaemonConfig,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut table = WatchTable::from_config(&config)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    table.register(&mut watcher);
    tracing::info!(
        watches = table.registrations().len(),
        role = %config.node_role,
        "watcher started",
    );

    let result = event_loop(&table, &config, &mut event_rx, shutdown_rx).await;

    tracing::debug!("removing watchers");
    table.unregister(&mut watcher);
    drop(watcher);
    result
}

async fn event_loop(
    table: &WatchTable,
    config: &DaemonConfig,
    event_rx: &mut mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return Err(DaemonError::ChannelClosed("watch events"));
                };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                for event in WatchEvent::from_notify(event) {
                    if let Some(command) = handle_event(table, &event) {
                        let ack = client::send_command(&config.socket_path, config.response_mode, &command).await?;
                        tracing::trace!(ack = %ack, "dispatcher acknowledged");
                    }
                }
            }
        }
    }
}

/// Classify and log `event`; returns the command to send, if any.
pub fn handle_event(table: &WatchTable, event: &WatchEvent) -> Option<Command> {
    tracing::trace!(kind = ?event.kind, path = ?event.path, "watch event");
    match table.classify(event) {
        EventAction::Emit(command) => {
            tracing::debug!(command = %command, "file changed");
            Some(command)
        }
        EventAction::Overflow => {
            tracing::info!("watch event queue overflowed");
            None
        }
        EventAction::Ignored => {
            tracing::debug!(kind = ?event.kind, path = ?event.path, "unhandled watch event");
            None
        }
        EventAction::Discarded | EventAction::Unmatched => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterd_core::WatchScope;
    use notify::event::{CreateKind, DataChange, Flag};

    fn table() -> WatchTable {
        WatchTable::build(
            Path::new("/nonexistent/ossec"),
            [
                WatchTarget::new("/etc/", WatchScope::Role("master".into())),
                WatchTarget::new("/etc/shared/", WatchScope::All),
                WatchTarget::new("/etc/ossec.conf", WatchScope::All),
            ],
            "client.keys",
        )
    }

    fn root(rel: &str) -> PathBuf {
        Path::new("/nonexistent/ossec").join(rel)
    }

    #[test]
    fn only_the_etc_entry_is_the_credential_registration() {
        let table = table();
        let kinds: Vec<_> = table.registrations().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [
                RegistrationKind::CredentialFile,
                RegistrationKind::Generic,
                RegistrationKind::Generic
            ]
        );
    }

    #[test]
    fn credential_name_predicate_is_a_substring_match() {
        assert!(matches_credential_name("client.keys", "client.keys"));
        assert!(matches_credential_name("client.keys.tmp", "client.keys"));
        assert!(!matches_credential_name("ossec.conf", "client.keys"));
    }

    #[test]
    fn modify_in_watched_directory_emits_update1_with_concatenated_id() {
        let event = WatchEvent::new(WatchEventKind::Modified, root("etc/shared/agent.conf"));
        assert_eq!(
            table().classify(&event),
            EventAction::Emit(Command::Update1 {
                file_id: FileId::from("/etc/shared/agent.conf")
            })
        );
    }

    #[test]
    fn modify_of_directly_watched_file_uses_its_relative_path() {
        let event = WatchEvent::new(WatchEventKind::Modified, root("etc/ossec.conf"));
        assert_eq!(
            table().classify(&event),
            EventAction::Emit(Command::Update1 {
                file_id: FileId::from("/etc/ossec.conf")
            })
        );
    }

    #[test]
    fn credential_registration_filters_other_names() {
        let table = table();
        let noise = WatchEvent::new(WatchEventKind::Modified, root("etc/internal_options.conf"));
        assert_eq!(table.classify(&noise), EventAction::Discarded);

        let keys = WatchEvent::new(WatchEventKind::MovedIn, root("etc/client.keys"));
        assert_eq!(
            table.classify(&keys),
            EventAction::Emit(Command::Update1 {
                file_id: FileId::from("/etc/client.keys")
            })
        );
    }

    #[test]
    fn overflow_emits_nothing() {
        let notify_event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let events = WatchEvent::from_notify(notify_event);
        assert_eq!(events, vec![WatchEvent::overflow()]);
        assert_eq!(table().classify(&events[0]), EventAction::Overflow);
        assert_eq!(handle_event(&table(), &events[0]), None);
    }

    #[test]
    fn other_kinds_are_ignored_and_unknown_paths_unmatched() {
        let table = table();
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(root("etc/shared/new.conf"));
        let events = WatchEvent::from_notify(created);
        assert_eq!(table.classify(&events[0]), EventAction::Ignored);

        let elsewhere = WatchEvent::new(WatchEventKind::Modified, "/tmp/unrelated");
        assert_eq!(table.classify(&elsewhere), EventAction::Unmatched);

        let nested = WatchEvent::new(WatchEventKind::Modified, root("etc/shared/default/agent.conf"));
        assert_eq!(table.classify(&nested), EventAction::Unmatched, "watches are not recursive");
    }

    #[test]
    fn notify_modify_and_rename_map_to_watch_kinds() {
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(root("etc/shared/a"));
        assert_eq!(WatchEvent::from_notify(data)[0].kind, WatchEventKind::Modified);

        let moved = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(root("etc/shared/a"));
        assert_eq!(WatchEvent::from_notify(moved)[0].kind, WatchEventKind::MovedIn);

        let paired = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root("etc/shared/a.tmp"))
            .add_path(root("etc/shared/a"));
        assert!(WatchEvent::from_notify(paired)
            .iter()
            .all(|e| e.kind == WatchEventKind::Other));
    }

    #[test]
    fn table_is_capped() {
        let targets = (0..MAX_WATCH_TARGETS + 3)
            .map(|i| WatchTarget::new(format!("/queue/{i}/"), WatchScope::All));
        let table = WatchTable::build(Path::new("/nonexistent"), targets, "client.keys");
        assert_eq!(table.registrations().len(), MAX_WATCH_TARGETS);
    }
}
