//! Read-only source of prompt defaults used when building provider requests.

use std::sync::RwLock;

use async_trait::async_trait;

use creditgate_ai::PromptDefaults;

#[async_trait]
pub trait PromptSettingsSource: Send + Sync + 'static {
    async fn prompt_defaults(&self) -> PromptDefaults;
}

/// Fixed defaults, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticPromptSettings {
    inner: RwLock<PromptDefaults>,
}

impl StaticPromptSettings {
    pub fn new(defaults: PromptDefaults) -> Self {
        Self {
            inner: RwLock::new(defaults),
        }
    }

    pub fn replace(&self, defaults: PromptDefaults) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = defaults;
        }
    }
}

#[async_trait]
impl PromptSettingsSource for StaticPromptSettings {
    async fn prompt_defaults(&self) -> PromptDefaults {
        self.inner.read().map(|d| d.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_takes_effect() {
        let source = StaticPromptSettings::new(PromptDefaults::default());
        source.replace(PromptDefaults {
            model: "other".into(),
            ..PromptDefaults::default()
        });
        assert_eq!(source.prompt_defaults().await.model, "other");
    }
}
