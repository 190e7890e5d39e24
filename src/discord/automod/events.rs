// Gateway event translation for automod.
//
// Pulls the primitive fields automod needs out of serenity's event types.
// Anything outside a guild, or any event automod doesn't care about, maps
// to `None`.

use crate::core::automod::{
    AutomodEvent, EmojiRef, MemberJoinEvent, MemberUpdateEvent, MessageEvent, MessageRef,
    ReactionEvent,
};
use poise::serenity_prelude as serenity;

pub fn to_automod_event(event: &serenity::FullEvent) -> Option<AutomodEvent> {
    match event {
        serenity::FullEvent::Message { new_message } => message_event(new_message),
        serenity::FullEvent::ReactionAdd { add_reaction } => reaction_event(add_reaction),
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            Some(AutomodEvent::MemberJoin(MemberJoinEvent {
                guild_id: new_member.guild_id.get(),
                user_id: new_member.user.id.get(),
                username: new_member.user.name.clone(),
                user_is_bot: new_member.user.bot,
            }))
        }
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            new: _,
            event,
        } => Some(AutomodEvent::MemberUpdate(MemberUpdateEvent {
            guild_id: event.guild_id.get(),
            user_id: event.user.id.get(),
            old_nickname: old_if_available.as_ref().map(|m| m.nick.clone()),
            new_nickname: event.nick.clone(),
            user_is_bot: event.user.bot,
        })),
        _ => None,
    }
}

fn message_event(msg: &serenity::Message) -> Option<AutomodEvent> {
    let guild_id = msg.guild_id?;

    Some(AutomodEvent::Message(MessageEvent {
        author_id: msg.author.id.get(),
        author_is_bot: msg.author.bot,
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
        content: msg.content.clone(),
        actor_role_ids: msg
            .member
            .as_ref()
            .map(|m| m.roles.iter().map(|r| r.get()).collect()),
    }))
}

fn reaction_event(reaction: &serenity::Reaction) -> Option<AutomodEvent> {
    let guild_id = reaction.guild_id?;
    let user_id = reaction.user_id?;

    let emoji = match &reaction.emoji {
        serenity::ReactionType::Unicode(glyph) => EmojiRef::unicode(glyph.clone()),
        serenity::ReactionType::Custom { animated, id, name } => {
            EmojiRef::custom(id.get(), name.clone().unwrap_or_default(), *animated)
        }
        _ => return None,
    };

    Some(AutomodEvent::Reaction(ReactionEvent {
        emoji,
        message: MessageRef {
            guild_id: guild_id.get(),
            channel_id: reaction.channel_id.get(),
            message_id: reaction.message_id.get(),
        },
        user_id: user_id.get(),
        // Missing member data means we can't tell; the bot-self gate still applies.
        user_is_bot: reaction.member.as_ref().is_some_and(|m| m.user.bot),
    }))
}
