//! Mapping between Discord messages and store records
//!
//! Channels are streams, messages are records and threads are sub-streams
//! (a thread started from a message shares that message's id). A card is
//! rendered as an embed, with its fields as embed fields and its actions as
//! buttons.

use serenity::builder::{CreateActionRow, CreateButton, CreateEmbed, CreateMessage, EditMessage};
use serenity::model::application::{ActionRowComponent, ButtonKind, ButtonStyle};
use serenity::model::channel::{Message, MessageFlags};
use threadkeep_core::{Card, CardAction, Record, RecordContent, RecordId, StreamId, UserId};

/// Discord allows at most five buttons in a row
const BUTTONS_PER_ROW: usize = 5;

pub fn to_record(msg: &Message) -> Record {
    let has_substream = msg.thread.is_some()
        || msg
            .flags
            .is_some_and(|flags| flags.contains(MessageFlags::HAS_THREAD));

    Record {
        id: RecordId(msg.id.get()),
        stream_id: StreamId(msg.channel_id.get()),
        author_id: UserId(msg.author.id.get()),
        created_at: chrono::DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
            .unwrap_or_default(),
        content: content_of(msg),
        has_substream,
    }
}

fn content_of(msg: &Message) -> RecordContent {
    let Some(embed) = msg.embeds.first() else {
        return RecordContent::text(msg.content.clone());
    };
    let Some(title) = embed.title.as_deref() else {
        return RecordContent::text(msg.content.clone());
    };

    let buttons = msg
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            ActionRowComponent::Button(button) => match &button.data {
                ButtonKind::NonLink { custom_id, .. } => Some(CardAction {
                    id: custom_id.clone(),
                    label: button.label.clone().unwrap_or_default(),
                    disabled: button.disabled,
                }),
                _ => None,
            },
            _ => None,
        });

    RecordContent::Card(card_from_parts(
        title,
        embed.description.as_deref(),
        embed.fields.iter().map(|f| (f.name.as_str(), f.value.as_str())),
        buttons,
    ))
}

/// Assemble a card from the pieces of a rendered embed
pub fn card_from_parts<'a>(
    title: &str,
    description: Option<&str>,
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    actions: impl IntoIterator<Item = CardAction>,
) -> Card {
    let mut card = Card::new(title);
    if let Some(description) = description {
        card = card.description(description);
    }
    for (name, value) in fields {
        card = card.field(name, value);
    }
    for action in actions {
        card = card.action(action);
    }
    card
}

pub fn card_embed(card: &Card) -> CreateEmbed {
    let mut embed = CreateEmbed::new().title(&card.title);
    if !card.description.is_empty() {
        embed = embed.description(&card.description);
    }
    for (name, value) in &card.fields {
        embed = embed.field(name, value, true);
    }
    embed
}

pub fn card_components(card: &Card) -> Vec<CreateActionRow> {
    card.actions
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            CreateActionRow::Buttons(
                row.iter()
                    .map(|action| {
                        CreateButton::new(&action.id)
                            .label(&action.label)
                            .style(ButtonStyle::Secondary)
                            .disabled(action.disabled)
                    })
                    .collect(),
            )
        })
        .collect()
}

pub fn create_message(content: &RecordContent) -> CreateMessage {
    match content {
        RecordContent::Text(text) => CreateMessage::new().content(text),
        RecordContent::Card(card) => CreateMessage::new()
            .embed(card_embed(card))
            .components(card_components(card)),
    }
}

/// Edits replace the whole message, so the parts a content kind does not use
/// are cleared.
pub fn edit_message(content: &RecordContent) -> EditMessage {
    match content {
        RecordContent::Text(text) => EditMessage::new()
            .content(text)
            .embeds(Vec::new())
            .components(Vec::new()),
        RecordContent::Card(card) => EditMessage::new()
            .content("")
            .embeds(vec![card_embed(card)])
            .components(card_components(card)),
    }
}
