//! Text command protocol.
//!
//! Inbound text is normalized once and parsed into a typed command;
//! anything that does not match falls through to summarization.

use crate::config::RecapConfig;
use crate::model::{LangChoice, User, UserStatus};
use crate::replies;
use crate::store::Store;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Pay,
    Stop,
    Start,
    Delete,
    Feedback,
    Lang(LangChoice),
    /// `LANG` with an unsupported code; replies with an error, mutates
    /// nothing.
    LangInvalid(String),
}

/// Trim, collapse internal whitespace, uppercase, strip trailing
/// punctuation.
pub fn normalize(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', '!', '?'])
        .trim()
        .to_ascii_uppercase()
}

/// Parse normalized text into a command. `None` means the message is
/// not a command.
pub fn parse(input: &str) -> Option<Command> {
    let normalized = normalize(input);
    match normalized.as_str() {
        "HELP" => return Some(Command::Help),
        "STATUS" => return Some(Command::Status),
        "PAY" => return Some(Command::Pay),
        "STOP" | "PAUSE" => return Some(Command::Stop),
        "START" => return Some(Command::Start),
        "DELETE" => return Some(Command::Delete),
        "FEEDBACK" => return Some(Command::Feedback),
        _ => {}
    }

    if let Some(arg) = normalized.strip_prefix("LANG ") {
        return Some(match LangChoice::parse(arg) {
            Some(choice) => Command::Lang(choice),
            None => Command::LangInvalid(arg.to_string()),
        });
    }
    if normalized == "LANG" {
        return Some(Command::LangInvalid(String::new()));
    }

    None
}

/// Execute a command against the user's state and return the reply.
pub async fn execute(
    store: &Store,
    cfg: &RecapConfig,
    user: &User,
    command: &Command,
) -> Result<String> {
    let lang = user.lang;
    let reply = match command {
        Command::Help => replies::help(lang),
        Command::Status => replies::status(lang, user.plan, user.free_remaining),
        Command::Pay => {
            let url = checkout_link(&cfg.billing.checkout_url, &user.phone);
            replies::pay(lang, &url)
        }
        Command::Stop => {
            store.set_user_status(&user.phone, UserStatus::Blocked).await?;
            replies::stop_confirm(lang).to_string()
        }
        Command::Start => {
            store.set_user_status(&user.phone, UserStatus::Active).await?;
            replies::start_confirm(lang).to_string()
        }
        Command::Delete => {
            store.reset_user_data(&user.phone, cfg.quota.free_messages).await?;
            replies::delete_confirm(lang).to_string()
        }
        Command::Feedback => replies::feedback(lang).to_string(),
        Command::Lang(choice) => {
            store.set_user_lang(&user.phone, *choice).await?;
            replies::lang_confirm(*choice)
        }
        Command::LangInvalid(code) => replies::lang_invalid(lang, code),
    };
    Ok(reply)
}

/// Checkout link with the sender identifier embedded as opaque custom
/// metadata, so a later billing webhook can be correlated back.
pub fn checkout_link(base_url: &str, phone: &str) -> String {
    let encoded = phone.replace('+', "%2B");
    format!("{base_url}?checkout[custom][user_id]={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecapConfig;
    use crate::model::now_ts;
    use crate::store::Store;

    #[test]
    fn normalization_collapses_and_strips() {
        assert_eq!(normalize("  stop  "), "STOP");
        assert_eq!(normalize("Stop!!"), "STOP");
        assert_eq!(normalize("lang   ar."), "LANG AR");
        assert_eq!(normalize("Help?"), "HELP");
    }

    #[test]
    fn parse_matches_the_fixed_command_set() {
        assert_eq!(parse("stop"), Some(Command::Stop));
        assert_eq!(parse("PAUSE"), Some(Command::Stop));
        assert_eq!(parse("Start"), Some(Command::Start));
        assert_eq!(parse("delete"), Some(Command::Delete));
        assert_eq!(parse("help"), Some(Command::Help));
        assert_eq!(parse("status"), Some(Command::Status));
        assert_eq!(parse("pay"), Some(Command::Pay));
        assert_eq!(parse("feedback"), Some(Command::Feedback));
        assert_eq!(parse("lang ar"), Some(Command::Lang(LangChoice::Ar)));
        assert_eq!(parse("LANG AUTO"), Some(Command::Lang(LangChoice::Auto)));
        assert_eq!(
            parse("lang fr"),
            Some(Command::LangInvalid("FR".to_string()))
        );
        assert_eq!(parse("please summarize this text"), None);
        assert_eq!(parse("stop it now"), None);
    }

    #[test]
    fn checkout_link_embeds_the_identifier() {
        let url = checkout_link("https://checkout.example.com/buy/x", "+15551230001");
        assert_eq!(
            url,
            "https://checkout.example.com/buy/x?checkout[custom][user_id]=%2B15551230001"
        );
    }

    #[tokio::test]
    async fn lang_command_persists_only_valid_codes() {
        let store = Store::open_in_memory(&Default::default()).unwrap();
        let cfg = RecapConfig::default();
        let user = store.get_or_create_user("1555", 5, now_ts()).await.unwrap();

        let reply = execute(&store, &cfg, &user, &Command::Lang(LangChoice::Ar))
            .await
            .unwrap();
        assert_eq!(reply, "LANG = ar");
        let updated = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(updated.lang, LangChoice::Ar);

        let reply = execute(
            &store,
            &cfg,
            &updated,
            &Command::LangInvalid("FR".to_string()),
        )
        .await
        .unwrap();
        assert!(reply.contains("FR"));
        let unchanged = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(unchanged.lang, LangChoice::Ar);
    }

    #[tokio::test]
    async fn stop_and_start_toggle_blocked_state() {
        let store = Store::open_in_memory(&Default::default()).unwrap();
        let cfg = RecapConfig::default();
        let user = store.get_or_create_user("1555", 5, now_ts()).await.unwrap();

        execute(&store, &cfg, &user, &Command::Stop).await.unwrap();
        assert_eq!(
            store.get_user("1555").await.unwrap().unwrap().status,
            UserStatus::Blocked
        );

        execute(&store, &cfg, &user, &Command::Start).await.unwrap();
        assert_eq!(
            store.get_user("1555").await.unwrap().unwrap().status,
            UserStatus::Active
        );
    }
}
