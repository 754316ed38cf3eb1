//! Button and modal handling for document control cards

use std::sync::Arc;

use serenity::builder::{
    CreateActionRow, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, CreateModal,
    EditInteractionResponse,
};
use serenity::client::Context;
use serenity::model::application::{
    ActionRowComponent, ComponentInteraction, InputTextStyle, ModalInteraction,
};
use threadkeep_core::document::{ActionKind, DocumentAction};
use threadkeep_core::{ActionGuard, ActionKey, CoreError, DocumentEngine, RecordId, UserId};
use tracing::{info, warn};

use crate::Result;
use crate::config::is_authorized_user;

/// Input id of the document text inside the edit modal
const DOCUMENT_INPUT: &str = "document";

/// Discord caps a paragraph input at this many characters
const MAX_INPUT_LEN: usize = 4000;

/// Discord caps modal titles at this many characters
const MAX_MODAL_TITLE: usize = 45;

#[derive(Debug)]
pub struct DocumentControls {
    engine: Arc<DocumentEngine>,
    guard: Arc<ActionGuard>,
    admin_users: Vec<UserId>,
}

impl DocumentControls {
    pub fn new(engine: Arc<DocumentEngine>, admin_users: Vec<UserId>) -> Self {
        Self {
            engine,
            guard: Arc::new(ActionGuard::new()),
            admin_users,
        }
    }

    /// A button on a control card was pressed. Ids that are not ours are
    /// ignored.
    pub async fn handle_component(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
    ) -> Result<()> {
        let Some(action) = DocumentAction::parse(&component.data.custom_id) else {
            return Ok(());
        };
        let user_id = component.user.id.get();
        if !is_authorized_user(user_id, &self.admin_users) {
            return reply(ctx, component, "🚫 Not authorized to change documents.").await;
        }

        let key = ActionKey::new(
            action.kind.to_string(),
            RecordId(component.message.id.get()),
            UserId(user_id),
        );
        let Some(_permit) = self.guard.try_acquire(key) else {
            let text = format!("⏳ Please wait, your previous {} is still running.", action.kind);
            return reply(ctx, component, &text).await;
        };

        info!(
            document = %action.document,
            action = %action.kind,
            user = user_id,
            "document action"
        );
        match action.kind {
            ActionKind::Edit => self.open_editor(ctx, component, &action).await,
            ActionKind::Lock | ActionKind::Unlock => {
                self.change_lock(ctx, component, &action).await
            }
        }
    }

    /// The edit modal was submitted
    pub async fn handle_modal(&self, ctx: &Context, modal: &ModalInteraction) -> Result<()> {
        let Some(action) = DocumentAction::parse(&modal.data.custom_id) else {
            return Ok(());
        };
        if action.kind != ActionKind::Edit {
            return Ok(());
        }
        let user_id = modal.user.id.get();
        if !is_authorized_user(user_id, &self.admin_users) {
            return respond(ctx, modal, "🚫 Not authorized to change documents.").await;
        }

        let target = modal
            .message
            .as_ref()
            .map(|m| RecordId(m.id.get()))
            .unwrap_or(RecordId(0));
        let key = ActionKey::new("submit", target, UserId(user_id));
        let Some(_permit) = self.guard.try_acquire(key) else {
            return respond(ctx, modal, "⏳ Please wait, your previous edit is still saving.").await;
        };

        let Some(text) = submitted_text(modal) else {
            return respond(ctx, modal, "❌ The edit form came back empty.").await;
        };

        modal
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(
                    CreateInteractionResponseMessage::new().ephemeral(true),
                ),
            )
            .await?;

        let outcome = match self.engine.submit_edit(&action.document, &text).await {
            Ok(doc) => {
                info!(document = %doc.name, user = user_id, "document edited");
                format!("✅ `{}` saved ({} fragments).", doc.name, doc.fragments.len())
            }
            Err(err) => {
                warn!(document = %action.document, error = %err, "edit rejected");
                describe(&err)
            }
        };
        modal
            .edit_response(&ctx.http, EditInteractionResponse::new().content(outcome))
            .await?;
        Ok(())
    }

    async fn open_editor(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
        action: &DocumentAction,
    ) -> Result<()> {
        let max_len = self.engine.settings().max_edit_len.min(MAX_INPUT_LEN);
        let text = match self
            .engine
            .begin_edit(&action.document)
            .and_then(|text| fit_input(&action.document, text, max_len))
        {
            Ok(text) => text,
            Err(err) => return reply(ctx, component, &describe(&err)).await,
        };

        let input = CreateInputText::new(InputTextStyle::Paragraph, "Document", DOCUMENT_INPUT)
            .value(text)
            .max_length(max_len as u16);
        let title: String = format!("Edit {}", action.document)
            .chars()
            .take(MAX_MODAL_TITLE)
            .collect();
        let modal = CreateModal::new(action.custom_id(), title)
            .components(vec![CreateActionRow::InputText(input)]);

        component
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await?;
        Ok(())
    }

    async fn change_lock(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
        action: &DocumentAction,
    ) -> Result<()> {
        component
            .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
            .await?;

        let result = match action.kind {
            ActionKind::Lock => self.engine.lock(&action.document).await,
            _ => self.engine.unlock(&action.document).await,
        };
        if let Err(err) = result {
            warn!(document = %action.document, error = %err, "lock change failed");
            component
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(describe(&err))
                        .ephemeral(true),
                )
                .await?;
        }
        Ok(())
    }
}

fn submitted_text(modal: &ModalInteraction) -> Option<String> {
    modal
        .data
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .find_map(|component| match component {
            ActionRowComponent::InputText(input) if input.custom_id == DOCUMENT_INPUT => {
                input.value.clone()
            }
            _ => None,
        })
}

/// Discord rejects a prefilled value longer than the input allows
fn fit_input(
    document: &str,
    text: String,
    max_len: usize,
) -> std::result::Result<String, CoreError> {
    let len = text.chars().count();
    if len > max_len {
        return Err(CoreError::size_limit(
            format!("document '{document}'"),
            max_len,
            len,
        ));
    }
    Ok(text)
}

/// User-facing text for an action failure
fn describe(err: &CoreError) -> String {
    match err {
        CoreError::ValidationFailure { document, details } => {
            format!("❌ `{document}` was not saved, it is not valid JSON: {details}")
        }
        CoreError::SizeLimitExceeded {
            subject, limit, ..
        } => {
            format!("❌ {subject} is too large to edit here (limit {limit} characters).")
        }
        CoreError::DocumentNotFound { name } => {
            format!("❌ `{name}` has not been synced yet.")
        }
        err if err.is_store_error() => {
            "⚠️ Discord did not accept the change, try again in a moment.".to_string()
        }
        err => format!("❌ {err}"),
    }
}

async fn reply(ctx: &Context, component: &ComponentInteraction, text: &str) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn respond(ctx: &Context, modal: &ModalInteraction, text: &str) -> Result<()> {
    modal
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}
