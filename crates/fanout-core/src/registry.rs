//! Scoped channel registration.

use crate::channel::ChannelId;
use crate::error::PushError;
use crate::event::{EventBus, PushEvent};
use crate::hub::ConnectionHub;
use crate::scope::{Scope, ScopeContext, SessionId, ViewId};
use crate::user::{SessionUserToken, UserId, UserRegistry};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// One registration of a name within a scope instance.
#[derive(Debug, Clone)]
struct Registration {
    id: ChannelId,
    user: Option<UserId>,
}

#[derive(Debug, Default)]
struct SessionEntry {
    channels: HashMap<String, Registration>,
    views: HashSet<ViewId>,
    /// Session-user tokens per identity seen by this session. A session
    /// normally holds one identity; more are tolerated.
    tokens: HashMap<UserId, SessionUserToken>,
}

#[derive(Debug)]
struct ViewEntry {
    session: SessionId,
    channels: HashMap<String, Registration>,
}

#[derive(Debug, Default)]
struct RegistryState {
    globals: HashMap<String, Registration>,
    sessions: HashMap<SessionId, SessionEntry>,
    views: HashMap<ViewId, ViewEntry>,
}

/// Maps (name, scope) to channel identifiers and tracks per-scope ownership
/// for bulk teardown.
///
/// The whole registry state sits behind one lock so the cross-scope
/// uniqueness check and the insert are a single atomic step.
#[derive(Debug)]
pub struct ChannelRegistry {
    state: RwLock<RegistryState>,
    users: Arc<UserRegistry>,
    hub: Arc<ConnectionHub>,
    events: Arc<EventBus>,
}

impl ChannelRegistry {
    /// Create a registry wired to its collaborators.
    pub fn new(users: Arc<UserRegistry>, hub: Arc<ConnectionHub>, events: Arc<EventBus>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            users,
            hub,
            events,
        }
    }

    /// Register `name` in `scope`, returning its channel id.
    ///
    /// Re-registration by the same scope instance is a no-op returning the
    /// original id. A name held by a different scope visible to the caller
    /// is refused with [`PushError::ChannelTaken`]. Name format is the
    /// caller's responsibility; identity and context requirements are
    /// enforced here.
    pub fn register(
        &self,
        name: &str,
        scope: Scope,
        user: Option<&UserId>,
        ctx: Option<&ScopeContext>,
    ) -> Result<ChannelId, PushError> {
        if scope == Scope::Global && user.is_some() {
            return Err(PushError::InvalidScope(
                "identity cannot be bound to a global channel".to_string(),
            ));
        }

        let (id, token) = {
            let mut state = self.state.write();

            if let Some(holder) = Self::holding_scope(&state, name, ctx) {
                if holder != scope {
                    return Err(PushError::ChannelTaken {
                        name: name.to_string(),
                        scope: holder,
                    });
                }
            }

            let registration = match scope {
                Scope::Global => Self::entry_for(&mut state.globals, name, user),
                Scope::Session => {
                    let Some(ctx) = ctx else {
                        return Err(PushError::InvalidScope(
                            "session scope requires a scope context".to_string(),
                        ));
                    };
                    let entry = state.sessions.entry(ctx.session.clone()).or_default();
                    Self::entry_for(&mut entry.channels, name, user)
                }
                Scope::View => {
                    let Some(ctx) = ctx else {
                        return Err(PushError::InvalidScope(
                            "view scope requires a scope context".to_string(),
                        ));
                    };
                    let Some(view) = ctx.view.as_ref() else {
                        return Err(PushError::InvalidScope(
                            "view scope requires a view id".to_string(),
                        ));
                    };
                    let view = view.clone();
                    let session = ctx.session.clone();
                    state
                        .sessions
                        .entry(session.clone())
                        .or_default()
                        .views
                        .insert(view.clone());
                    let entry = state.views.entry(view).or_insert_with(|| ViewEntry {
                        session,
                        channels: HashMap::new(),
                    });
                    Self::entry_for(&mut entry.channels, name, user)
                }
            };

            let token = match (user, ctx) {
                (Some(user), Some(ctx)) => {
                    let entry = state.sessions.entry(ctx.session.clone()).or_default();
                    Some(
                        entry
                            .tokens
                            .entry(user.clone())
                            .or_insert_with(SessionUserToken::generate)
                            .clone(),
                    )
                }
                _ => None,
            };

            (registration, token)
        };

        // The bucket must exist before the id can reach any client.
        self.hub.register_channel_id(&id);

        if let (Some(user), Some(token)) = (user, token) {
            self.users.register_session_identity(user, &token);
            self.users.associate_channel(&token, name, id.clone());
        }

        debug!(name, scope = %scope, channel = %id, "Channel registered");
        Ok(id)
    }

    /// Get-or-create the registration for `name` in one scope map.
    fn entry_for(
        map: &mut HashMap<String, Registration>,
        name: &str,
        user: Option<&UserId>,
    ) -> ChannelId {
        let registration = map
            .entry(name.to_string())
            .or_insert_with(|| Registration {
                id: ChannelId::issue(name),
                user: None,
            });
        if registration.user.is_none() {
            registration.user = user.cloned();
        }
        registration.id.clone()
    }

    /// Which scope visible to `ctx` currently holds `name`, if any.
    fn holding_scope(state: &RegistryState, name: &str, ctx: Option<&ScopeContext>) -> Option<Scope> {
        if state.globals.contains_key(name) {
            return Some(Scope::Global);
        }
        let ctx = ctx?;
        if let Some(entry) = state.sessions.get(&ctx.session) {
            if entry.channels.contains_key(name) {
                return Some(Scope::Session);
            }
        }
        if let Some(view) = &ctx.view {
            if let Some(entry) = state.views.get(view) {
                if entry.channels.contains_key(name) {
                    return Some(Scope::View);
                }
            }
        }
        None
    }

    /// Resolve `name` to its current channel id, most specific still-active
    /// scope first: view, then session, then global.
    pub fn resolve(&self, name: &str, ctx: Option<&ScopeContext>) -> Option<ChannelId> {
        let state = self.state.read();
        if let Some(ctx) = ctx {
            if let Some(view) = &ctx.view {
                if let Some(reg) = state.views.get(view).and_then(|e| e.channels.get(name)) {
                    return Some(reg.id.clone());
                }
            }
            if let Some(reg) = state
                .sessions
                .get(&ctx.session)
                .and_then(|e| e.channels.get(name))
            {
                return Some(reg.id.clone());
            }
        }
        state.globals.get(name).map(|reg| reg.id.clone())
    }

    /// Re-associate a live registration from one identity to another
    /// without changing its channel id, e.g. login over an already-open
    /// anonymous push connection. Fires an identity-switch event.
    pub fn switch_identity(
        &self,
        name: &str,
        scope: Scope,
        old: Option<&UserId>,
        new: Option<&UserId>,
        ctx: Option<&ScopeContext>,
    ) -> Result<(), PushError> {
        if scope == Scope::Global {
            return Err(PushError::InvalidScope(
                "identity cannot be bound to a global channel".to_string(),
            ));
        }
        let ctx = ctx.ok_or_else(|| {
            PushError::InvalidScope(format!("{} scope requires a scope context", scope))
        })?;

        let (id, old_token, new_token) = {
            let mut state = self.state.write();

            let id = match scope {
                Scope::Session => state
                    .sessions
                    .get_mut(&ctx.session)
                    .and_then(|e| e.channels.get_mut(name)),
                Scope::View => {
                    let view = ctx.view.as_ref().ok_or_else(|| {
                        PushError::InvalidScope("view scope requires a view id".to_string())
                    })?;
                    state.views.get_mut(view).and_then(|e| e.channels.get_mut(name))
                }
                Scope::Global => unreachable!("rejected above"),
            }
            .map(|registration| {
                registration.user = new.cloned();
                registration.id.clone()
            })
            .ok_or_else(|| PushError::NotRegistered(name.to_string()))?;

            let entry = state.sessions.entry(ctx.session.clone()).or_default();
            let old_token = old.and_then(|user| entry.tokens.get(user).cloned());
            let new_token = new.map(|user| {
                entry
                    .tokens
                    .entry(user.clone())
                    .or_insert_with(SessionUserToken::generate)
                    .clone()
            });

            (id, old_token, new_token)
        };

        if let (Some(_), Some(token)) = (old, &old_token) {
            self.users.dissociate_channel(token, name, &id);
        }
        if let (Some(user), Some(token)) = (new, &new_token) {
            self.users.register_session_identity(user, token);
            self.users.associate_channel(token, name, id.clone());
        }

        info!(name, channel = %id, previous = ?old, current = ?new, "Channel identity switched");
        self.events.publish(PushEvent::IdentitySwitched {
            channel: name.to_string(),
            previous: old.cloned(),
            current: new.cloned(),
        });
        Ok(())
    }

    /// View teardown: close and forget everything the view owned.
    pub fn end_view(&self, view: &ViewId) {
        let (ids, dissociations) = {
            let mut state = self.state.write();
            let Some(entry) = state.views.remove(view) else {
                return;
            };
            if let Some(session) = state.sessions.get_mut(&entry.session) {
                session.views.remove(view);
            }

            let mut ids = Vec::new();
            let mut dissociations = Vec::new();
            let tokens = state
                .sessions
                .get(&entry.session)
                .map(|s| s.tokens.clone())
                .unwrap_or_default();
            for (name, registration) in entry.channels {
                if let Some(token) = registration
                    .user
                    .as_ref()
                    .and_then(|user| tokens.get(user).cloned())
                {
                    dissociations.push((token, name.clone(), registration.id.clone()));
                }
                ids.push(registration.id);
            }
            (ids, dissociations)
        };

        for (token, name, id) in &dissociations {
            self.users.dissociate_channel(token, name, id);
        }
        self.hub.deregister(&ids);
        debug!(view = %view, channels = ids.len(), "View scope ended");
    }

    /// Session teardown: cascades over the session's views, closes every
    /// owned connection and drops the session's identities.
    pub fn end_session(&self, session: &SessionId) {
        let (ids, tokens) = {
            let mut state = self.state.write();
            let Some(entry) = state.sessions.remove(session) else {
                return;
            };

            let mut ids: Vec<ChannelId> = entry
                .channels
                .into_values()
                .map(|registration| registration.id)
                .collect();
            for view in entry.views {
                if let Some(view_entry) = state.views.remove(&view) {
                    ids.extend(
                        view_entry
                            .channels
                            .into_values()
                            .map(|registration| registration.id),
                    );
                }
            }
            (ids, entry.tokens)
        };

        self.hub.deregister(&ids);
        for (user, token) in &tokens {
            self.users.deregister_session_identity(user, token);
        }
        info!(session = %session, channels = ids.len(), "Session scope ended");
    }

    /// Global-scope registrations for the restart snapshot.
    pub(crate) fn export_global(&self) -> HashMap<String, ChannelId> {
        self.state
            .read()
            .globals
            .iter()
            .map(|(name, registration)| (name.clone(), registration.id.clone()))
            .collect()
    }

    /// Restore global-scope registrations, re-creating their hub buckets.
    pub(crate) fn import_global(&self, channels: HashMap<String, ChannelId>) {
        let mut state = self.state.write();
        for (name, id) in channels {
            self.hub.register_channel_id(&id);
            state
                .globals
                .entry(name)
                .or_insert(Registration { id, user: None });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;

    fn setup() -> (ChannelRegistry, Arc<UserRegistry>, Arc<ConnectionHub>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let users = Arc::new(UserRegistry::new());
        let hub = Arc::new(ConnectionHub::new(users.clone(), events.clone()));
        let registry = ChannelRegistry::new(users.clone(), hub.clone(), events.clone());
        (registry, users, hub, events)
    }

    fn ctx() -> ScopeContext {
        ScopeContext::with_view(SessionId::generate(), ViewId::generate())
    }

    #[test]
    fn test_register_global() {
        let (registry, _, hub, _) = setup();
        let id = registry.register("news", Scope::Global, None, None).unwrap();
        assert_eq!(id.name(), "news");
        assert!(hub.is_registered(&id));
    }

    #[test]
    fn test_register_is_idempotent_per_scope_instance() {
        let (registry, _, _, _) = setup();
        let ctx = ctx();

        let first = registry
            .register("chat", Scope::Session, None, Some(&ctx))
            .unwrap();
        let second = registry
            .register("chat", Scope::Session, None, Some(&ctx))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cross_scope_conflict() {
        let (registry, _, _, _) = setup();
        let ctx = ctx();

        registry.register("chat", Scope::Global, None, None).unwrap();
        let result = registry.register("chat", Scope::Session, None, Some(&ctx));
        assert!(matches!(
            result,
            Err(PushError::ChannelTaken {
                scope: Scope::Global,
                ..
            })
        ));

        registry
            .register("feed", Scope::Session, None, Some(&ctx))
            .unwrap();
        let result = registry.register("feed", Scope::View, None, Some(&ctx));
        assert!(matches!(
            result,
            Err(PushError::ChannelTaken {
                scope: Scope::Session,
                ..
            })
        ));
    }

    #[test]
    fn test_same_name_across_sessions() {
        let (registry, _, _, _) = setup();
        let ctx1 = ScopeContext::new(SessionId::generate());
        let ctx2 = ScopeContext::new(SessionId::generate());

        let id1 = registry
            .register("chat", Scope::Session, None, Some(&ctx1))
            .unwrap();
        let id2 = registry
            .register("chat", Scope::Session, None, Some(&ctx2))
            .unwrap();
        assert_ne!(id1, id2);
        assert_eq!(id1.name(), id2.name());
    }

    #[test]
    fn test_identity_requires_non_global_scope() {
        let (registry, _, _, _) = setup();
        let alice = UserId::from("alice");
        let result = registry.register("news", Scope::Global, Some(&alice), None);
        assert!(matches!(result, Err(PushError::InvalidScope(_))));
    }

    #[test]
    fn test_view_scope_requires_view_id() {
        let (registry, _, _, _) = setup();
        let ctx = ScopeContext::new(SessionId::generate());
        let result = registry.register("chat", Scope::View, None, Some(&ctx));
        assert!(matches!(result, Err(PushError::InvalidScope(_))));

        let result = registry.register("chat", Scope::Session, None, None);
        assert!(matches!(result, Err(PushError::InvalidScope(_))));
    }

    #[test]
    fn test_register_with_identity_associates_user() {
        let (registry, users, _, _) = setup();
        let ctx = ctx();
        let alice = UserId::from("alice");

        let id = registry
            .register("chat", Scope::Session, Some(&alice), Some(&ctx))
            .unwrap();

        let ids = users.resolve_channel_ids(&alice, "chat");
        assert!(ids.contains(&id));
        assert_eq!(users.resolve_identity("chat", &id), Some(alice));
    }

    #[test]
    fn test_resolution_precedence() {
        let (registry, _, _, _) = setup();
        let ctx = ctx();

        let session_id = registry
            .register("chat", Scope::Session, None, Some(&ctx))
            .unwrap();
        let view_id = registry
            .register("ticker", Scope::View, None, Some(&ctx))
            .unwrap();
        let global_id = registry.register("news", Scope::Global, None, None).unwrap();

        // Each name resolves only via the scope that actually holds it.
        assert_eq!(registry.resolve("chat", Some(&ctx)), Some(session_id));
        assert_eq!(registry.resolve("ticker", Some(&ctx)), Some(view_id));
        assert_eq!(registry.resolve("news", Some(&ctx)), Some(global_id.clone()));

        // Without scope state only global registrations are visible.
        assert_eq!(registry.resolve("chat", None), None);
        assert_eq!(registry.resolve("news", None), Some(global_id));
        assert_eq!(registry.resolve("absent", Some(&ctx)), None);
    }

    #[tokio::test]
    async fn test_switch_identity() {
        let (registry, users, _, events) = setup();
        let mut rx = events.subscribe();
        let ctx = ctx();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let id = registry
            .register("chat", Scope::Session, Some(&alice), Some(&ctx))
            .unwrap();

        registry
            .switch_identity("chat", Scope::Session, Some(&alice), Some(&bob), Some(&ctx))
            .unwrap();

        // Same channel id, new owner.
        assert!(users.resolve_channel_ids(&alice, "chat").is_empty());
        assert!(users.resolve_channel_ids(&bob, "chat").contains(&id));

        let event = rx.try_recv().unwrap();
        match event {
            PushEvent::IdentitySwitched {
                channel,
                previous,
                current,
            } => {
                assert_eq!(channel, "chat");
                assert_eq!(previous, Some(alice));
                assert_eq!(current, Some(bob));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_switch_identity_unregistered() {
        let (registry, _, _, _) = setup();
        let ctx = ctx();
        let result =
            registry.switch_identity("ghost", Scope::Session, None, Some(&UserId::from("a")), Some(&ctx));
        assert!(matches!(result, Err(PushError::NotRegistered(_))));
    }

    #[test]
    fn test_end_view_removes_only_view_channels() {
        let (registry, _, hub, _) = setup();
        let ctx = ctx();

        let session_id = registry
            .register("chat", Scope::Session, None, Some(&ctx))
            .unwrap();
        let view_id = registry
            .register("ticker", Scope::View, None, Some(&ctx))
            .unwrap();

        registry.end_view(ctx.view.as_ref().unwrap());

        assert!(!hub.is_registered(&view_id));
        assert!(hub.is_registered(&session_id));
        assert_eq!(registry.resolve("ticker", Some(&ctx)), None);
        assert_eq!(registry.resolve("chat", Some(&ctx)), Some(session_id));

        // The name is free again for a fresh view.
        let again = registry
            .register("ticker", Scope::View, None, Some(&ctx))
            .unwrap();
        assert_ne!(again, view_id);
    }

    #[test]
    fn test_end_session_cascades() {
        let (registry, users, hub, _) = setup();
        let ctx = ctx();
        let alice = UserId::from("alice");

        let session_id = registry
            .register("chat", Scope::Session, Some(&alice), Some(&ctx))
            .unwrap();
        let view_id = registry
            .register("ticker", Scope::View, None, Some(&ctx))
            .unwrap();

        registry.end_session(&ctx.session);

        assert!(!hub.is_registered(&session_id));
        assert!(!hub.is_registered(&view_id));
        assert_eq!(registry.resolve("chat", Some(&ctx)), None);
        assert!(users.resolve_channel_ids(&alice, "chat").is_empty());
        assert_eq!(users.identity_count(), 0);
    }

    #[test]
    fn test_export_import_global() {
        let (registry, _, _, _) = setup();
        registry.register("news", Scope::Global, None, None).unwrap();
        registry.register("alerts", Scope::Global, None, None).unwrap();

        let exported = registry.export_global();
        assert_eq!(exported.len(), 2);

        let (restored, _, hub, _) = setup();
        restored.import_global(exported.clone());
        for (name, id) in &exported {
            assert_eq!(restored.resolve(name, None).as_ref(), Some(id));
            assert!(hub.is_registered(id));
        }
    }
}
