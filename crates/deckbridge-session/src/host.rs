//! Binding of inbound deck requests to host-side actions.

use std::sync::Arc;

use deckbridge_transport::protocol::{
    ActiveSessionChangedMessage, ChangeLanguageMessage, CreateTerminalMessage,
    ExecuteCommandMessage, ExecuteTerminalCommandMessage, InsertSnippetMessage,
    OpenFolderMessage,
};
use serde_json::Value;

use crate::{SessionError, SessionHandle, SubscriptionId};

/// Host-side effects requested by the deck.
///
/// Called for every request that passes the empty-field guards in
/// [`bind_host`], whether or not this session is the active one. Errors are
/// logged by the dispatcher.
pub trait HostActions: Send + Sync + 'static {
    /// Open a terminal.
    fn create_terminal(&self, request: &CreateTerminalMessage) -> anyhow::Result<()>;

    /// Type `command` into the active terminal.
    fn execute_terminal_command(&self, command: &str) -> anyhow::Result<()>;

    /// Run a host command with optional JSON arguments.
    fn execute_command(&self, command: &str, arguments: Option<Value>) -> anyhow::Result<()>;

    /// Switch the active document's language.
    fn change_language(&self, _language_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Insert the named snippet into the active editor.
    fn insert_snippet(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Open a folder, in a new window if `new_window`.
    fn open_folder(&self, _path: &str, _new_window: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keep the session's activity in sync with `ActiveSessionChanged`
/// notifications.
///
/// The subscription holds a clone of `handle`, so the manager task keeps
/// running until [`SessionHandle::deactivate`] is called.
///
/// # Errors
/// Returns [`SessionError::Stopped`] if the manager task has ended.
pub fn track_active_session(handle: &SessionHandle) -> Result<SubscriptionId, SessionError> {
    let session = handle.clone();
    handle.subscribe::<ActiveSessionChangedMessage, _>(move |context, message| {
        if context.is_local_session(&message.session_id) {
            tracing::info!(session_id = %message.session_id, "deck now drives this session");
            session.set_session_as_active()?;
        } else {
            tracing::debug!(session_id = %message.session_id, "deck drives another session");
            session.set_session_as_inactive()?;
        }
        Ok(())
    })
}

/// Subscribe `host` to every inbound request, plus active session tracking.
///
/// Requests with an empty command, name or path are skipped. Command
/// arguments that are not valid JSON are logged and the command runs
/// without arguments.
///
/// # Errors
/// Returns [`SessionError::Stopped`] if the manager task has ended.
pub fn bind_host<H: HostActions>(
    handle: &SessionHandle,
    host: Arc<H>,
) -> Result<Vec<SubscriptionId>, SessionError> {
    let mut ids = vec![track_active_session(handle)?];

    let h = Arc::clone(&host);
    ids.push(handle.subscribe::<CreateTerminalMessage, _>(move |_, request| {
        h.create_terminal(request)
    })?);

    let h = Arc::clone(&host);
    ids.push(handle.subscribe::<ExecuteTerminalCommandMessage, _>(move |_, request| {
        if request.command.is_empty() {
            return Ok(());
        }
        h.execute_terminal_command(&request.command)
    })?);

    let h = Arc::clone(&host);
    ids.push(handle.subscribe::<ExecuteCommandMessage, _>(move |_, request| {
        if request.command.is_empty() {
            return Ok(());
        }
        let arguments = request.parsed_arguments().unwrap_or_else(|e| {
            tracing::warn!(command = %request.command, error = %e, "ignoring malformed command arguments");
            None
        });
        h.execute_command(&request.command, arguments)
    })?);

    let h = Arc::clone(&host);
    ids.push(handle.subscribe::<ChangeLanguageMessage, _>(move |_, request| {
        if request.language_id.is_empty() {
            return Ok(());
        }
        h.change_language(&request.language_id)
    })?);

    let h = Arc::clone(&host);
    ids.push(handle.subscribe::<InsertSnippetMessage, _>(move |_, request| {
        if request.name.is_empty() {
            return Ok(());
        }
        h.insert_snippet(&request.name)
    })?);

    ids.push(handle.subscribe::<OpenFolderMessage, _>(move |_, request| {
        if request.path.is_empty() {
            return Ok(());
        }
        host.open_folder(&request.path, request.new_window)
    })?);

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use deckbridge_transport::TransportSignal;

    use super::*;
    use crate::testing::{Call, Recorder, connected, wait_until};

    #[derive(Debug, Default)]
    struct FakeHost {
        actions: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn record(&self, action: String) -> anyhow::Result<()> {
            self.actions.lock().unwrap().push(action);
            Ok(())
        }

        fn actions(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }
    }

    impl HostActions for FakeHost {
        fn create_terminal(&self, request: &CreateTerminalMessage) -> anyhow::Result<()> {
            self.record(format!("terminal:{}", request.name.as_deref().unwrap_or("")))
        }

        fn execute_terminal_command(&self, command: &str) -> anyhow::Result<()> {
            self.record(format!("type:{command}"))
        }

        fn execute_command(&self, command: &str, arguments: Option<Value>) -> anyhow::Result<()> {
            let arguments = arguments.map_or_else(|| "-".to_string(), |value| value.to_string());
            self.record(format!("run:{command}:{arguments}"))
        }

        fn open_folder(&self, path: &str, new_window: bool) -> anyhow::Result<()> {
            self.record(format!("open:{path}:{new_window}"))
        }
    }

    fn frame(id: &str, data: &str) -> TransportSignal {
        let envelope = deckbridge_transport::Envelope {
            id: id.to_string(),
            data: data.to_string(),
        };
        TransportSignal::MessageReceived(envelope.to_wire().unwrap())
    }

    #[tokio::test]
    async fn test_active_session_tracking() {
        let recorder = Recorder::default();
        let (handle, task) = recorder.manager().spawn();
        track_active_session(&handle).unwrap();
        handle.activate().unwrap();
        wait_until(|| recorder.connects(0) == 1).await;
        recorder.emit(0, TransportSignal::Connected);
        wait_until(|| recorder.count_status(connected()) == 1).await;

        recorder.emit(0, frame("ActiveSessionChangedMessage", r#"{"sessionId":"me"}"#));
        wait_until(|| recorder.calls().last().is_some_and(|c| matches!(c, Call::Status(s) if s.is_active())))
            .await;

        recorder.emit(0, frame("ActiveSessionChangedMessage", r#"{"sessionId":"other"}"#));
        wait_until(|| recorder.calls().last() == Some(&Call::Status(connected()))).await;

        handle.deactivate().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_host_guards_requests() {
        let recorder = Recorder::default();
        let (handle, task) = recorder.manager().spawn();
        let host = Arc::new(FakeHost::default());
        let ids = bind_host(&handle, Arc::clone(&host)).unwrap();
        assert_eq!(ids.len(), 7);

        handle.activate().unwrap();
        wait_until(|| recorder.connects(0) == 1).await;

        for signal in [
            frame("ExecuteTerminalCommandMessage", r#"{"command":""}"#),
            frame("ExecuteTerminalCommandMessage", r#"{"command":"ls"}"#),
            frame("ExecuteCommandMessage", r#"{"command":"save","arguments":"{\"all\":true}"}"#),
            frame("ExecuteCommandMessage", r#"{"command":"close","arguments":"{oops"}"#),
            frame("ExecuteCommandMessage", r#"{"command":"reload","arguments":null}"#),
            frame("ExecuteCommandMessage", r#"{"command":null,"arguments":null}"#),
            frame("OpenFolderMessage", r#"{"path":"","newWindow":true}"#),
            frame("OpenFolderMessage", r#"{"path":"/src","newWindow":true}"#),
            frame("InsertSnippetMessage", r#"{"name":"log"}"#),
            frame("CreateTerminalMessage", r#"{"name":"deck"}"#),
        ] {
            recorder.emit(0, signal);
        }

        wait_until(|| host.actions().len() == 6).await;
        assert_eq!(
            host.actions(),
            vec![
                "type:ls".to_string(),
                r#"run:save:{"all":true}"#.to_string(),
                "run:close:-".to_string(),
                "run:reload:-".to_string(),
                "open:/src:true".to_string(),
                "terminal:deck".to_string(),
            ]
        );

        handle.deactivate().await.unwrap();
        task.await.unwrap();
    }
}
