//! Command routing.
//!
//! The dispatcher turns each decoded [`Command`] into exactly one direct
//! [`Response`] for the issuing session, invoking registry and room
//! operations on the way. Side-effect traffic (room broadcasts, whispers,
//! kick notices) rides the affected peers' outbound queues and never blocks
//! the issuer.
//!
//! Every user-facing failure is converted to [`Response::Error`] here; no
//! error escapes to the connection loop, so one session's bad input can
//! never disturb another session's processing.
//!
//! State machine per session: unauthenticated sessions may only REGISTER
//! and LOGIN. Everything else requires authentication, and KICK and
//! DELETE_ROOM additionally require the username to be in the configured
//! administrator set.

use std::{collections::HashSet, sync::Arc};

use palaver_proto::{Command, Response, RoomMessage};

use crate::{
    credentials::CredentialStore,
    registry::SessionRegistry,
    rooms::RoomRegistry,
    session::Session,
};

/// Longest accepted username or room name.
const MAX_NAME_LEN: usize = 64;

/// Routes commands to registry and room operations.
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    credentials: Arc<dyn CredentialStore>,
    admins: HashSet<String>,
}

/// A username or room name must be non-empty, reasonably short, and free
/// of control characters (it travels inside line-delimited JSON).
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && !name.chars().any(char::is_control)
}

impl Dispatcher {
    /// Create a dispatcher over the given registries and credential store.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomRegistry>,
        credentials: Arc<dyn CredentialStore>,
        admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            sessions,
            rooms,
            credentials,
            admins: admins.into_iter().collect(),
        }
    }

    /// Process one command for `session` and produce its direct reply.
    pub async fn dispatch(&self, session: &Arc<Session>, command: Command) -> Response {
        tracing::debug!(session = %session.id(), command = command.name(), "dispatching");

        match command {
            Command::Register { username, password } => self.register(&username, &password),
            Command::Login { username, password } => self.login(session, username, &password).await,
            Command::Join { room } => self.join(session, &room).await,
            Command::Leave { room } => self.leave(session, &room).await,
            Command::Chat { room, message } => self.chat(session, &room, message).await,
            Command::Whisper { target, message } => self.whisper(session, &target, message).await,
            Command::List => self.list(session).await,
            Command::Rooms => self.room_names(session).await,
            Command::Kick { target } => self.kick(session, &target).await,
            Command::DeleteRoom { room } => self.delete_room(session, &room).await,
        }
    }

    fn register(&self, username: &str, password: &str) -> Response {
        if !valid_name(username) {
            return Response::error("invalid username");
        }
        if self.credentials.register(username, password) {
            tracing::info!(user = %username, "user registered");
            Response::RegisterOk
        } else {
            Response::error("username already exists")
        }
    }

    async fn login(&self, session: &Arc<Session>, username: String, password: &str) -> Response {
        if session.username().is_some() {
            return Response::error("already authenticated");
        }
        if !self.credentials.verify(&username, password) {
            tracing::debug!(session = %session.id(), user = %username, "login rejected");
            return Response::error("invalid credentials");
        }
        if !self.sessions.insert(&username, session).await {
            return Response::error("user already logged in");
        }
        // Only this session's command loop can reach this point, so the
        // username cannot have been set since the check above.
        session.authenticate(username.clone());
        tracing::info!(session = %session.id(), user = %username, "login");
        Response::LoginOk
    }

    async fn join(&self, session: &Arc<Session>, room_name: &str) -> Response {
        if session.username().is_none() {
            return Response::error("not authenticated");
        }
        if !valid_name(room_name) {
            return Response::error("invalid room name");
        }

        let room = self.rooms.get_or_create(room_name).await;
        let history = room.join(session).await;
        session.join_room(room_name).await;

        tracing::info!(session = %session.id(), room = %room_name, "joined room");
        Response::JoinOk { room: room_name.to_owned(), history }
    }

    async fn leave(&self, session: &Arc<Session>, room_name: &str) -> Response {
        if session.username().is_none() {
            return Response::error("not authenticated");
        }
        if !session.leave_room(room_name).await {
            return Response::error(format!("not a member of {room_name}"));
        }
        if let Some(room) = self.rooms.get(room_name).await {
            room.remove_member(session.id()).await;
        }

        tracing::info!(session = %session.id(), room = %room_name, "left room");
        Response::LeaveOk { room: room_name.to_owned() }
    }

    async fn chat(&self, session: &Arc<Session>, room_name: &str, text: String) -> Response {
        let Some(from) = session.username() else {
            return Response::error("not authenticated");
        };
        if !session.is_member(room_name).await {
            return Response::error(format!("not a member of {room_name}"));
        }
        let Some(room) = self.rooms.get(room_name).await else {
            // The room was deleted while this session was still a member;
            // reconcile the stale membership entry now.
            session.leave_room(room_name).await;
            return Response::error("room does not exist");
        };

        let delivered = room
            .broadcast(RoomMessage { from: from.to_owned(), text }, Some(session.id()))
            .await;
        tracing::debug!(session = %session.id(), room = %room_name, delivered, "chat broadcast");
        Response::ChatOk { room: room_name.to_owned() }
    }

    async fn whisper(&self, session: &Arc<Session>, target: &str, text: String) -> Response {
        let Some(from) = session.username() else {
            return Response::error("not authenticated");
        };
        let Some(peer) = self.sessions.get(target).await else {
            return Response::error("user not found");
        };
        if !peer.submit(Response::Whisper { from: from.to_owned(), text }) {
            // The target vanished between lookup and delivery.
            return Response::error("user not found");
        }
        Response::WhisperOk
    }

    async fn list(&self, session: &Arc<Session>) -> Response {
        if session.username().is_none() {
            return Response::error("not authenticated");
        }
        Response::ListOk { users: self.sessions.list_users().await }
    }

    async fn room_names(&self, session: &Arc<Session>) -> Response {
        if session.username().is_none() {
            return Response::error("not authenticated");
        }
        Response::RoomsOk { rooms: self.rooms.names().await }
    }

    async fn kick(&self, session: &Arc<Session>, target: &str) -> Response {
        let Some(issuer) = session.username() else {
            return Response::error("not authenticated");
        };
        if !self.admins.contains(issuer) {
            return Response::error("not authorized");
        }
        let Some(victim) = self.sessions.get(target).await else {
            return Response::error("user not found");
        };

        // Notify, unregister, then close. The registry entry goes away
        // before the reply so the target is absent from any later LIST;
        // the victim's own cleanup will find its entry already gone.
        victim.submit(Response::Kicked { reason: format!("kicked by {issuer}") });
        self.sessions.remove(target, &victim).await;
        victim.begin_close();

        tracing::info!(user = %target, by = %issuer, "session kicked");
        Response::KickOk
    }

    async fn delete_room(&self, session: &Arc<Session>, room_name: &str) -> Response {
        let Some(issuer) = session.username() else {
            return Response::error("not authenticated");
        };
        if !self.admins.contains(issuer) {
            return Response::error("not authorized");
        }
        if self.rooms.remove(room_name).await.is_none() {
            return Response::error("room does not exist");
        }

        tracing::info!(room = %room_name, by = %issuer, "room deleted");
        Response::DeleteRoomOk { room: room_name.to_owned() }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("admins", &self.admins).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{credentials::MemoryCredentials, session::SessionId};
    use palaver_proto::Response;
    use tokio::sync::mpsc;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(RoomRegistry::new(10)),
            Arc::new(MemoryCredentials::new()),
            ["admin".to_owned()],
        )
    }

    fn session(id: u64) -> (Arc<Session>, mpsc::Receiver<Response>) {
        Session::new(SessionId::new(id), 32)
    }

    async fn login_as(
        dispatcher: &Dispatcher,
        session: &Arc<Session>,
        username: &str,
    ) -> Response {
        let registered = dispatcher
            .dispatch(
                session,
                Command::Register { username: username.into(), password: "pw".into() },
            )
            .await;
        assert!(
            matches!(registered, Response::RegisterOk | Response::Error { .. }),
            "unexpected register reply: {registered:?}"
        );
        dispatcher
            .dispatch(session, Command::Login { username: username.into(), password: "pw".into() })
            .await
    }

    fn assert_error_contains(response: &Response, needle: &str) {
        match response {
            Response::Error { message } => {
                assert!(message.contains(needle), "error {message:?} missing {needle:?}");
            }
            other => panic!("expected error containing {needle:?}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_duplicate_username_fails() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        let first = dispatcher
            .dispatch(
                &alice,
                Command::Register { username: "alice".into(), password: "pw1".into() },
            )
            .await;
        assert_eq!(first, Response::RegisterOk);

        let second = dispatcher
            .dispatch(
                &alice,
                Command::Register { username: "alice".into(), password: "pw2".into() },
            )
            .await;
        assert_error_contains(&second, "exists");
    }

    #[tokio::test]
    async fn register_rejects_invalid_username() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        let reply = dispatcher
            .dispatch(&alice, Command::Register { username: String::new(), password: "pw".into() })
            .await;
        assert_error_contains(&reply, "invalid username");

        let reply = dispatcher
            .dispatch(
                &alice,
                Command::Register { username: "evil\nname".into(), password: "pw".into() },
            )
            .await;
        assert_error_contains(&reply, "invalid username");
    }

    #[tokio::test]
    async fn login_happy_path_and_wrong_password() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        dispatcher
            .dispatch(
                &alice,
                Command::Register { username: "alice".into(), password: "pw1".into() },
            )
            .await;

        let wrong = dispatcher
            .dispatch(&alice, Command::Login { username: "alice".into(), password: "nope".into() })
            .await;
        assert_error_contains(&wrong, "invalid credentials");

        let ok = dispatcher
            .dispatch(&alice, Command::Login { username: "alice".into(), password: "pw1".into() })
            .await;
        assert_eq!(ok, Response::LoginOk);
        assert_eq!(alice.username(), Some("alice"));
    }

    #[tokio::test]
    async fn double_login_is_rejected() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        assert_eq!(login_as(&dispatcher, &alice, "alice").await, Response::LoginOk);

        let again = dispatcher
            .dispatch(&alice, Command::Login { username: "alice".into(), password: "pw".into() })
            .await;
        assert_error_contains(&again, "already authenticated");
    }

    #[tokio::test]
    async fn second_session_for_same_user_is_rejected() {
        let dispatcher = dispatcher();
        let (first, _rx1) = session(1);
        let (second, _rx2) = session(2);

        assert_eq!(login_as(&dispatcher, &first, "alice").await, Response::LoginOk);

        let reply = dispatcher
            .dispatch(&second, Command::Login { username: "alice".into(), password: "pw".into() })
            .await;
        assert_error_contains(&reply, "already logged in");
        assert_eq!(second.username(), None);
    }

    #[tokio::test]
    async fn commands_require_authentication() {
        let dispatcher = dispatcher();
        let (stranger, _rx) = session(1);

        let commands = [
            Command::Join { room: "general".into() },
            Command::Leave { room: "general".into() },
            Command::Chat { room: "general".into(), message: "hi".into() },
            Command::Whisper { target: "bob".into(), message: "hi".into() },
            Command::List,
            Command::Rooms,
            Command::Kick { target: "bob".into() },
            Command::DeleteRoom { room: "general".into() },
        ];

        for command in commands {
            let name = command.name();
            let reply = dispatcher.dispatch(&stranger, command).await;
            assert_error_contains(&reply, "not authenticated");
            assert!(!name.is_empty());
        }
    }

    #[tokio::test]
    async fn chat_reaches_member_but_not_sender() {
        let dispatcher = dispatcher();
        let (alice, mut alice_rx) = session(1);
        let (bob, mut bob_rx) = session(2);

        login_as(&dispatcher, &alice, "alice").await;
        login_as(&dispatcher, &bob, "bob").await;

        dispatcher.dispatch(&alice, Command::Join { room: "general".into() }).await;
        dispatcher.dispatch(&bob, Command::Join { room: "general".into() }).await;

        let reply = dispatcher
            .dispatch(&alice, Command::Chat { room: "general".into(), message: "hi".into() })
            .await;
        assert_eq!(reply, Response::ChatOk { room: "general".into() });

        match bob_rx.recv().await {
            Some(Response::Message { room, from, text }) => {
                assert_eq!(room, "general");
                assert_eq!(from, "alice");
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected push: {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err(), "sender must not receive its own echo");
    }

    #[tokio::test]
    async fn join_replies_with_history() {
        let dispatcher = dispatcher();
        let (alice, _arx) = session(1);
        let (bob, _brx) = session(2);

        login_as(&dispatcher, &alice, "alice").await;
        login_as(&dispatcher, &bob, "bob").await;

        dispatcher.dispatch(&alice, Command::Join { room: "general".into() }).await;
        dispatcher
            .dispatch(&alice, Command::Chat { room: "general".into(), message: "first".into() })
            .await;

        let reply = dispatcher.dispatch(&bob, Command::Join { room: "general".into() }).await;
        match reply {
            Response::JoinOk { room, history } => {
                assert_eq!(room, "general");
                assert_eq!(
                    history,
                    vec![RoomMessage { from: "alice".into(), text: "first".into() }]
                );
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_without_membership_fails() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        login_as(&dispatcher, &alice, "alice").await;

        let reply = dispatcher
            .dispatch(&alice, Command::Chat { room: "general".into(), message: "hi".into() })
            .await;
        assert_error_contains(&reply, "not a member");
    }

    #[tokio::test]
    async fn leave_non_member_room_fails_softly() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        login_as(&dispatcher, &alice, "alice").await;

        let reply = dispatcher.dispatch(&alice, Command::Leave { room: "general".into() }).await;
        assert_error_contains(&reply, "not a member");

        // The session is still usable afterwards.
        let reply = dispatcher.dispatch(&alice, Command::Join { room: "general".into() }).await;
        assert!(matches!(reply, Response::JoinOk { .. }));
        let reply = dispatcher.dispatch(&alice, Command::Leave { room: "general".into() }).await;
        assert_eq!(reply, Response::LeaveOk { room: "general".into() });
    }

    #[tokio::test]
    async fn whisper_delivers_or_reports_unknown_user() {
        let dispatcher = dispatcher();
        let (alice, _arx) = session(1);
        let (bob, mut bob_rx) = session(2);

        login_as(&dispatcher, &alice, "alice").await;

        let reply = dispatcher
            .dispatch(&alice, Command::Whisper { target: "bob".into(), message: "psst".into() })
            .await;
        assert_error_contains(&reply, "user not found");

        login_as(&dispatcher, &bob, "bob").await;
        let reply = dispatcher
            .dispatch(&alice, Command::Whisper { target: "bob".into(), message: "psst".into() })
            .await;
        assert_eq!(reply, Response::WhisperOk);

        match bob_rx.recv().await {
            Some(Response::Whisper { from, text }) => {
                assert_eq!(from, "alice");
                assert_eq!(text, "psst");
            }
            other => panic!("unexpected push: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_shows_live_users() {
        let dispatcher = dispatcher();
        let (alice, _arx) = session(1);
        let (bob, _brx) = session(2);

        login_as(&dispatcher, &alice, "alice").await;
        login_as(&dispatcher, &bob, "bob").await;

        let reply = dispatcher.dispatch(&alice, Command::List).await;
        assert_eq!(reply, Response::ListOk { users: vec!["alice".into(), "bob".into()] });
    }

    #[tokio::test]
    async fn kick_requires_admin() {
        let dispatcher = dispatcher();
        let (alice, _arx) = session(1);
        let (bob, _brx) = session(2);

        login_as(&dispatcher, &alice, "alice").await;
        login_as(&dispatcher, &bob, "bob").await;

        let reply = dispatcher.dispatch(&alice, Command::Kick { target: "bob".into() }).await;
        assert_error_contains(&reply, "not authorized");
    }

    #[tokio::test]
    async fn kick_notifies_closes_and_unregisters_target() {
        let dispatcher = dispatcher();
        let (admin, _admin_rx) = session(1);
        let (bob, mut bob_rx) = session(2);

        login_as(&dispatcher, &admin, "admin").await;
        login_as(&dispatcher, &bob, "bob").await;

        let reply = dispatcher.dispatch(&admin, Command::Kick { target: "bob".into() }).await;
        assert_eq!(reply, Response::KickOk);

        assert!(bob.is_closing());
        match bob_rx.recv().await {
            Some(Response::Kicked { reason }) => assert!(reason.contains("admin")),
            other => panic!("unexpected push: {other:?}"),
        }

        // The target is gone from any subsequent LIST.
        let reply = dispatcher.dispatch(&admin, Command::List).await;
        assert_eq!(reply, Response::ListOk { users: vec!["admin".into()] });
    }

    #[tokio::test]
    async fn kick_unknown_user_fails() {
        let dispatcher = dispatcher();
        let (admin, _rx) = session(1);

        login_as(&dispatcher, &admin, "admin").await;

        let reply = dispatcher.dispatch(&admin, Command::Kick { target: "ghost".into() }).await;
        assert_error_contains(&reply, "user not found");
    }

    #[tokio::test]
    async fn delete_room_is_admin_only_and_chat_afterwards_fails() {
        let dispatcher = dispatcher();
        let (admin, _admin_rx) = session(1);
        let (alice, _alice_rx) = session(2);

        login_as(&dispatcher, &admin, "admin").await;
        login_as(&dispatcher, &alice, "alice").await;

        dispatcher.dispatch(&alice, Command::Join { room: "doomed".into() }).await;

        let reply =
            dispatcher.dispatch(&alice, Command::DeleteRoom { room: "doomed".into() }).await;
        assert_error_contains(&reply, "not authorized");

        let reply =
            dispatcher.dispatch(&admin, Command::DeleteRoom { room: "doomed".into() }).await;
        assert_eq!(reply, Response::DeleteRoomOk { room: "doomed".into() });

        let reply = dispatcher.dispatch(&admin, Command::Rooms).await;
        assert_eq!(reply, Response::RoomsOk { rooms: vec![] });

        // A member's stale membership is reconciled on the next chat.
        let reply = dispatcher
            .dispatch(&alice, Command::Chat { room: "doomed".into(), message: "hello?".into() })
            .await;
        assert_error_contains(&reply, "room does not exist");
        assert!(!alice.is_member("doomed").await);
    }

    #[tokio::test]
    async fn join_rejects_invalid_room_name() {
        let dispatcher = dispatcher();
        let (alice, _rx) = session(1);

        login_as(&dispatcher, &alice, "alice").await;

        let reply = dispatcher.dispatch(&alice, Command::Join { room: String::new() }).await;
        assert_error_contains(&reply, "invalid room name");

        let long = "r".repeat(65);
        let reply = dispatcher.dispatch(&alice, Command::Join { room: long }).await;
        assert_error_contains(&reply, "invalid room name");
    }
}
