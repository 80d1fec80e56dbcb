use serde::{Deserialize, Deserializer, Serialize, de};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const ALL: [Self; 2] = [Self::User, Self::Assistant];

    /// Position of the role in label tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::User => 0,
            Self::Assistant => 1,
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    /// Accepts the role name or its numeric index (`0` user, `1` assistant).
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Index(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => match name.as_str() {
                "user" => Ok(Self::User),
                "assistant" => Ok(Self::Assistant),
                other => Err(de::Error::unknown_variant(other, &["user", "assistant"])),
            },
            Repr::Index(index) => Self::ALL
                .into_iter()
                .find(|role| u64::try_from(role.index()).is_ok_and(|i| i == index))
                .ok_or_else(|| de::Error::custom(format!("invalid role index {index}"))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a conversation.
///
/// `tokens == 0` marks a message whose token count has not been finalized yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tokens: u32,
}

impl Message {
    /// Create an uncounted message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tokens: 0,
        }
    }

    #[must_use]
    pub const fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub const fn is_counted(&self) -> bool {
        self.tokens > 0
    }
}

/// Speaker names used when a message is rendered into prompt text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLabels {
    labels: [String; 2],
}

impl RoleLabels {
    #[must_use]
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        let mut labels = [String::new(), String::new()];
        labels[Role::User.index()] = user.into();
        labels[Role::Assistant.index()] = assistant.into();
        Self { labels }
    }

    #[must_use]
    pub fn label(&self, role: Role) -> &str {
        &self.labels[role.index()]
    }

    /// Render a message as `"<label>: <content>"`.
    #[must_use]
    pub fn render(&self, message: &Message) -> String {
        format!("{}: {}", self.label(message.role), message.content)
    }
}

impl Default for RoleLabels {
    fn default() -> Self {
        Self::new("User", "Zipp")
    }
}
