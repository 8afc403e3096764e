//! Chat command dispatcher.
//!
//! Parses prefixed commands out of message events and drives the bind,
//! unbind and authorization approval flows against the store. Handler errors
//! are caught here and answered with a generic failure reply; they never
//! take the dispatcher down.

use super::events::{at_mention, parse_message_event, MessageEvent};
use super::transport::{BotTransport, EventHandler};
use crate::config::AppConfig;
use crate::provider::generate_state_token;
use crate::security::sanitize_username;
use crate::sso::SsoClient;
use crate::store::{
    AuditLogStore, BindingStore, FullIdpStore, NewAuthorizationLog, NewPendingBind,
    NewPendingUnbind, NewUnbindLog, PendingStore, SourceKind,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

const UNBIND_CONFIRM_TTL_SECS: i64 = 300;
const MAX_USERNAME_LENGTH: usize = 64;

pub struct CommandDispatcher {
    config: Arc<AppConfig>,
    store: Arc<dyn FullIdpStore>,
    transport: Arc<BotTransport>,
    sso: Arc<SsoClient>,
}

/// Splits a prefixed chat message into a lower-cased command and its
/// arguments. Returns None when the message does not carry the prefix.
pub fn parse_command(prefix: &str, text: &str) -> Option<(String, Vec<String>)> {
    let text = text.trim();
    let rest = text.strip_prefix(prefix)?;
    // The prefix must be its own token: "/ssoauth" is not a command.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut parts = rest.split_whitespace();
    let cmd = parts.next().unwrap_or("").to_lowercase();
    let args = parts.map(String::from).collect();
    Some((cmd, args))
}

impl CommandDispatcher {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn FullIdpStore>,
        transport: Arc<BotTransport>,
        sso: Arc<SsoClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            transport,
            sso,
        })
    }

    fn prefix(&self) -> &str {
        &self.config.bot.command_prefix
    }

    /// Replies to the originating chat; group replies at-mention the sender.
    async fn reply(&self, msg: &MessageEvent, text: &str) {
        let (kind, target, body) = match msg.source_kind {
            SourceKind::Group => (
                SourceKind::Group,
                msg.source_id(),
                at_mention(msg.user_id, text),
            ),
            SourceKind::Private => (SourceKind::Private, msg.user_id, text.to_string()),
        };
        if self
            .transport
            .send_message(kind, target, &body)
            .await
            .is_none()
        {
            error!("Failed to deliver reply to {}", target);
        }
    }

    async fn handle_message(&self, msg: MessageEvent) {
        let Some((cmd, args)) = parse_command(self.prefix(), &msg.text) else {
            return;
        };

        // Group allow-list: configured and non-empty means everything else is
        // silently dropped.
        if msg.source_kind == SourceKind::Group {
            let allowed = &self.config.bot.allowed_groups;
            if !allowed.is_empty() && !allowed.contains(&msg.source_id()) {
                return;
            }
        }

        let result = match cmd.as_str() {
            "" | "help" => self.handle_help(&msg).await,
            "bind" => self.handle_bind(&msg, &args).await,
            "unbind" => self.handle_unbind(&msg, &args).await,
            "auth" => self.handle_auth(&msg, &args).await,
            "cancel" => self.handle_cancel(&msg).await,
            "status" => self.handle_status(&msg).await,
            other => {
                self.reply(
                    &msg,
                    &format!(
                        "Unknown command: {}\nUse {} help for the command list",
                        other,
                        self.prefix()
                    ),
                )
                .await;
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Command '{}' from {} failed: {:#}", cmd, msg.user_id, e);
            self.reply(&msg, "Something went wrong, please try again later")
                .await;
        }
    }

    async fn handle_help(&self, msg: &MessageEvent) -> Result<()> {
        let prefix = self.prefix();
        let help_text = format!(
            "SSO binding assistant\n\
             \n\
             Commands:\n\
             {prefix} bind <username> - bind an SSO account\n\
             {prefix} unbind <username> - unbind an SSO account\n\
             {prefix} unbind confirm - confirm unbinding\n\
             {prefix} auth <code> - approve an authorization request\n\
             {prefix} cancel - cancel the current operation\n\
             {prefix} status - show binding status\n\
             {prefix} help - show this help"
        );
        self.reply(msg, &help_text).await;
        Ok(())
    }

    async fn handle_bind(&self, msg: &MessageEvent, args: &[String]) -> Result<()> {
        let Some(raw_username) = args.first() else {
            self.reply(
                msg,
                &format!("Username required\nUsage: {} bind <username>", self.prefix()),
            )
            .await;
            return Ok(());
        };
        let username = sanitize_username(raw_username, MAX_USERNAME_LENGTH);

        if !self.config.sso.enabled {
            self.reply(msg, "SSO binding is not enabled").await;
            return Ok(());
        }

        if let Some(existing) = self.store.get_bind_user_by_uin(msg.user_id, true)? {
            self.reply(
                msg,
                &format!(
                    "You are already bound to: {}\nUnbind first to switch accounts: {} unbind <username>",
                    existing.display_name(),
                    self.prefix()
                ),
            )
            .await;
            return Ok(());
        }

        let state = generate_state_token();
        self.store.create_pending_bind(NewPendingBind {
            state: state.clone(),
            uin: msg.user_id,
            username,
            source_kind: msg.source_kind,
            source_id: msg.source_id(),
            expires_in_secs: self.config.binding.bind_link_expire_secs,
        })?;

        let auth_url = self.sso.build_authorization_url(&state).await;
        let minutes = self.config.binding.bind_link_expire_secs / 60;
        self.reply(
            msg,
            &format!(
                "Open this link within {} minutes to finish binding:\n{}",
                minutes, auth_url
            ),
        )
        .await;
        Ok(())
    }

    async fn handle_unbind(&self, msg: &MessageEvent, args: &[String]) -> Result<()> {
        let Some(first) = args.first() else {
            self.reply(
                msg,
                &format!(
                    "Username required, or confirm with: {} unbind confirm",
                    self.prefix()
                ),
            )
            .await;
            return Ok(());
        };

        let pending = self.store.get_pending_unbind_by_uin(msg.user_id)?;

        if first.eq_ignore_ascii_case("confirm") {
            let Some(pending) = pending else {
                self.reply(msg, "No unbind request awaiting confirmation")
                    .await;
                return Ok(());
            };

            let Some(bind_user) = self.store.get_bind_user_by_uin(msg.user_id, true)? else {
                self.store.mark_pending_unbind_processed(pending.id)?;
                self.reply(msg, "You have no bound account").await;
                return Ok(());
            };

            self.store.deactivate_bind_user(bind_user.id)?;
            self.store.create_unbind_log(NewUnbindLog {
                uin: msg.user_id,
                unbind_user: pending.username.clone(),
                sub: bind_user.sub.clone(),
                bind_time: bind_user.bind_time,
                is_unbind: true,
                reason: "confirm".to_string(),
            })?;
            self.store.mark_pending_unbind_processed(pending.id)?;

            // Outstanding tokens live out their TTL; unbinding only stops new
            // authorizations.
            info!("Unbound uin {} from sub {}", msg.user_id, bind_user.sub);
            self.reply(msg, &format!("Unbound account: {}", pending.username))
                .await;
            return Ok(());
        }

        let username = first;
        let Some(bind_user) = self.store.get_bind_user_by_uin(msg.user_id, true)? else {
            self.reply(msg, "You have no bound account").await;
            return Ok(());
        };

        // The provided name must match the binding to guard against slips.
        let bound_username = bind_user.display_name();
        let matches = username.to_lowercase() == bound_username.to_lowercase()
            || bind_user
                .email
                .as_deref()
                .is_some_and(|email| username.to_lowercase() == email.to_lowercase())
            || username.as_str() == bind_user.sub;
        if !matches {
            self.reply(
                msg,
                &format!("Username does not match; your bound account is: {}", bound_username),
            )
            .await;
            return Ok(());
        }

        // A newer unbind request supersedes any earlier one.
        if let Some(pending) = pending {
            self.store.mark_pending_unbind_processed(pending.id)?;
        }

        self.store.create_pending_unbind(NewPendingUnbind {
            uin: msg.user_id,
            username: username.clone(),
            bind_user_id: bind_user.id,
            source_kind: msg.source_kind,
            source_id: msg.source_id(),
            expires_in_secs: UNBIND_CONFIRM_TTL_SECS,
        })?;

        self.reply(
            msg,
            &format!(
                "You are unbinding account: {}\n\
                 Send {} unbind confirm within 5 minutes to confirm\n\
                 or {} cancel to abort",
                username,
                self.prefix(),
                self.prefix()
            ),
        )
        .await;
        Ok(())
    }

    async fn handle_auth(&self, msg: &MessageEvent, args: &[String]) -> Result<()> {
        let Some(code) = args.first() else {
            self.reply(
                msg,
                &format!("Verification code required\nUsage: {} auth <code>", self.prefix()),
            )
            .await;
            return Ok(());
        };
        // Codes are case-insensitive for the person typing them.
        let code = code.to_uppercase();

        let Some(bind_user) = self.store.get_bind_user_by_uin(msg.user_id, true)? else {
            self.reply(
                msg,
                &format!(
                    "You have no bound SSO account; bind first: {} bind <username>",
                    self.prefix()
                ),
            )
            .await;
            return Ok(());
        };

        let Some(pending) = self
            .store
            .get_pending_auth_by_verification_code(&code, true)?
        else {
            self.reply(msg, "Invalid or expired verification code").await;
            return Ok(());
        };

        if pending.uin == 0 {
            // Claim the request for this user. A concurrent claim loses here
            // because the update requires uin = 0.
            if !self
                .store
                .claim_pending_auth(pending.id, msg.user_id, bind_user.id)?
            {
                self.reply(msg, "This verification code is not yours").await;
                return Ok(());
            }
        } else if pending.uin != msg.user_id {
            self.reply(msg, "This verification code is not yours").await;
            return Ok(());
        }

        if !self.store.approve_pending_auth(pending.id)? {
            self.reply(msg, "Invalid or expired verification code").await;
            return Ok(());
        }

        let client_name = self
            .config
            .find_client(&pending.client_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Unknown application".to_string());

        self.store.create_authorization_log(NewAuthorizationLog {
            uin: msg.user_id,
            client_id: pending.client_id.clone(),
            address: pending.redirect_uri.clone(),
            scope: pending.scope.clone(),
            is_success: true,
            client_ip: pending.client_ip.clone(),
            user_agent: pending.user_agent.clone(),
        })?;
        crate::server::metrics::AUTH_APPROVALS.inc();
        info!(
            "uin {} approved authorization for client {}",
            msg.user_id, pending.client_id
        );

        self.reply(
            msg,
            &format!(
                "Authorization approved\nApplication: {}\nScope: {}",
                client_name, pending.scope
            ),
        )
        .await;
        Ok(())
    }

    async fn handle_cancel(&self, msg: &MessageEvent) -> Result<()> {
        if let Some(pending) = self.store.get_pending_unbind_by_uin(msg.user_id)? {
            if let Some(bind_user) = self.store.get_bind_user_by_uin(msg.user_id, true)? {
                self.store.create_unbind_log(NewUnbindLog {
                    uin: msg.user_id,
                    unbind_user: pending.username.clone(),
                    sub: bind_user.sub.clone(),
                    bind_time: bind_user.bind_time,
                    is_unbind: false,
                    reason: "cancel".to_string(),
                })?;
            }
            self.store.mark_pending_unbind_processed(pending.id)?;
            self.reply(msg, "Unbind request cancelled").await;
        } else {
            self.reply(msg, "Nothing to cancel").await;
        }
        Ok(())
    }

    async fn handle_status(&self, msg: &MessageEvent) -> Result<()> {
        let Some(bind_user) = self.store.get_bind_user_by_uin(msg.user_id, true)? else {
            self.reply(msg, "You have no bound SSO account").await;
            return Ok(());
        };

        let status_text = format!(
            "Binding status: bound\n\
             Username: {}\n\
             Email: {}\n\
             Bound at: {}",
            bind_user.preferred_username.as_deref().unwrap_or("-"),
            bind_user.email.as_deref().unwrap_or("-"),
            bind_user.bind_time.format("%Y-%m-%d %H:%M:%S"),
        );
        self.reply(msg, &status_text).await;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for CommandDispatcher {
    async fn handle_event(&self, event: serde_json::Value) {
        if let Some(msg) = parse_message_event(&event) {
            self.handle_message(msg).await;
        }
    }
}
