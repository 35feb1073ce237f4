//! UI message table, French and English. Library errors stay English;
//! only the interactive surface is localized.

use merlya::types::{I18nConfig, Language};

#[derive(Debug, Clone, Copy)]
pub enum Msg {
    ConfirmModerate,
    ConfirmCriticalPhrase,
    PhraseMismatch,
    BreakerOpen,
    Goodbye,
    ReplHello,
    NothingFound,
}

pub struct Messages {
    language: Language,
}

impl Messages {
    /// Pick the configured language, falling back to the host locale and
    /// then to English.
    pub fn from_config(config: &I18nConfig) -> Self {
        let language = config.language.unwrap_or_else(|| {
            let locale = std::env::var("LC_ALL")
                .or_else(|_| std::env::var("LANG"))
                .unwrap_or_default();
            if locale.to_ascii_lowercase().starts_with("fr") {
                Language::Fr
            } else {
                Language::En
            }
        });
        Self { language }
    }

    pub fn get(&self, msg: Msg) -> &'static str {
        match (self.language, msg) {
            (Language::En, Msg::ConfirmModerate) => "This command changes the host. Run it?",
            (Language::Fr, Msg::ConfirmModerate) => "Cette commande modifie l'hôte. L'exécuter ?",
            (Language::En, Msg::ConfirmCriticalPhrase) => {
                "This command is destructive. Type the host name to confirm"
            }
            (Language::Fr, Msg::ConfirmCriticalPhrase) => {
                "Cette commande est destructrice. Saisissez le nom de l'hôte pour confirmer"
            }
            (Language::En, Msg::PhraseMismatch) => "Phrase mismatch; aborted.",
            (Language::Fr, Msg::PhraseMismatch) => "Phrase incorrecte ; abandon.",
            (Language::En, Msg::BreakerOpen) => "Host suspended by the circuit breaker.",
            (Language::Fr, Msg::BreakerOpen) => "Hôte suspendu par le disjoncteur.",
            (Language::En, Msg::Goodbye) => "Bye.",
            (Language::Fr, Msg::Goodbye) => "Au revoir.",
            (Language::En, Msg::ReplHello) => {
                "merlya - type `run <host> <command>`, `:help` for commands"
            }
            (Language::Fr, Msg::ReplHello) => {
                "merlya - tapez `run <hôte> <commande>`, `:help` pour l'aide"
            }
            (Language::En, Msg::NothingFound) => "nothing found",
            (Language::Fr, Msg::NothingFound) => "aucun résultat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_language_wins() {
        let messages = Messages::from_config(&I18nConfig {
            language: Some(Language::Fr),
        });
        assert_eq!(messages.get(Msg::Goodbye), "Au revoir.");
    }
}
