//! Event serialization for the worker → supervisor channel
//!
//! Converts Twilight events into [`DispatchPayload`]s named after the
//! gateway event they came from.

use crate::protocol::DispatchPayload;
use twilight_model::gateway::event::Event;

/// Serialize a Twilight event to a dispatch payload
///
/// Returns None for gateway control events (heartbeats, hello, reconnect)
/// and for events the gateway forwards nothing for.
pub fn dispatch_payload(event: &Event) -> Option<DispatchPayload> {
    let (name, data) = match event {
        Event::Ready(ready) => (
            "READY",
            serde_json::json!({
                "session_id": ready.session_id,
                "guilds": ready.guilds.len(),
            }),
        ),

        Event::Resumed => ("RESUMED", serde_json::Value::Null),

        Event::GuildCreate(guild) => (
            "GUILD_CREATE",
            serde_json::json!({
                "guild_id": guild.id().to_string(),
            }),
        ),

        Event::GuildDelete(guild) => (
            "GUILD_DELETE",
            serde_json::json!({
                "guild_id": guild.id.to_string(),
                "unavailable": guild.unavailable,
            }),
        ),

        Event::MemberAdd(member) => (
            "GUILD_MEMBER_ADD",
            serde_json::json!({
                "guild_id": member.guild_id.to_string(),
                "user_id": member.user.id.to_string(),
                "username": member.user.name,
            }),
        ),

        Event::MemberRemove(member) => (
            "GUILD_MEMBER_REMOVE",
            serde_json::json!({
                "guild_id": member.guild_id.to_string(),
                "user_id": member.user.id.to_string(),
            }),
        ),

        Event::MemberUpdate(member) => (
            "GUILD_MEMBER_UPDATE",
            serde_json::json!({
                "guild_id": member.guild_id.to_string(),
                "user_id": member.user.id.to_string(),
                "roles": member.roles.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
                "nick": member.nick,
            }),
        ),

        Event::MessageCreate(message) => (
            "MESSAGE_CREATE",
            serde_json::json!({
                "id": message.id.to_string(),
                "channel_id": message.channel_id.to_string(),
                "guild_id": message.guild_id.map(|id| id.to_string()),
                "author_id": message.author.id.to_string(),
                "content": message.content,
            }),
        ),

        Event::InteractionCreate(interaction) => (
            "INTERACTION_CREATE",
            serde_json::json!({
                "interaction_id": interaction.id.to_string(),
                "interaction_type": format!("{:?}", interaction.kind),
                "interaction_token": interaction.token,
                "guild_id": interaction.guild_id.map(|id| id.to_string()),
                "channel_id": interaction.channel.as_ref().map(|c| c.id.to_string()),
                "user_id": interaction.author_id().map(|id| id.to_string()),
            }),
        ),

        // Control events the worker handles itself
        Event::GatewayHeartbeatAck
        | Event::GatewayHello(_)
        | Event::GatewayInvalidateSession(_)
        | Event::GatewayReconnect => return None,

        _ => return None,
    };

    Some(DispatchPayload::new(name, data))
}
