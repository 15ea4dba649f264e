use serde::{Deserialize, Serialize};

use super::ids::ResourceId;

/// Template used when a guild does not configure one.
pub const DEFAULT_NAME_TEMPLATE: &str = "{username}'s Channel";

/// Default audio quality (bitrate in bits per second).
pub const DEFAULT_QUALITY: u32 = 64_000;

/// Per-guild configuration governing temporary channel creation.
///
/// Joining `creator_resource_id` spawns a new temporary channel for the
/// member. The creator channel itself is never temporary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPolicy {
    pub creator_resource_id: ResourceId,
    /// Category new channels are placed under.
    pub container_id: Option<ResourceId>,
    /// Channel name with `{username}` / `{user}` placeholders.
    pub name_template: String,
    /// Member limit for new channels, 0 = unlimited.
    pub default_capacity: u32,
    pub default_quality: u32,
    /// Create a paired text channel alongside each voice channel.
    #[serde(default)]
    pub auto_secondary_resource: bool,
    /// Whether owners may edit their channel's properties.
    #[serde(default = "default_true")]
    pub editable: bool,
}

fn default_true() -> bool {
    true
}

impl GuildPolicy {
    pub fn new(creator_resource_id: ResourceId) -> Self {
        Self {
            creator_resource_id,
            container_id: None,
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            default_capacity: 0,
            default_quality: DEFAULT_QUALITY,
            auto_secondary_resource: false,
            editable: true,
        }
    }

    /// Substitute a member's names into the template.
    ///
    /// `{username}` takes the display name and `{user}` the account name.
    /// Substituted text is never scanned again.
    pub fn render_name(&self, profile: &MemberProfile) -> String {
        let mut rendered = String::with_capacity(self.name_template.len());
        let mut rest = self.name_template.as_str();
        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            rest = &rest[start..];
            if let Some(tail) = rest.strip_prefix("{username}") {
                rendered.push_str(&profile.display_name);
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("{user}") {
                rendered.push_str(&profile.username);
                rest = tail;
            } else {
                rendered.push('{');
                rest = &rest[1..];
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

/// The names a member is known by in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub display_name: String,
    pub username: String,
}

impl MemberProfile {
    pub fn new(display_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            username: username.into(),
        }
    }
}

/// Name for a paired text channel: lowercase with anything outside
/// `[a-z0-9]` replaced by `-`.
pub fn secondary_resource_name(primary_name: &str) -> String {
    let slug: String = primary_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("chat-{}", slug)
}
