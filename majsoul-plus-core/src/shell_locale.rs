use std::env;

pub const DEFAULT_SHELL_LOCALE: &str = "zh-CN";

#[derive(Debug, Clone, Copy)]
pub struct ShellTexts {
    pub program_name: &'static str,
    pub import_blocked_in_game: &'static str,
    pub startup_failed_title: &'static str,
    pub ok_button: &'static str,
}

pub fn shell_texts_for_locale(locale: &str) -> ShellTexts {
    if locale == "en-US" {
        return ShellTexts {
            program_name: "Majsoul Plus",
            import_blocked_in_game: "Extensions cannot be imported while the game is running!",
            startup_failed_title: "Failed to start the game",
            ok_button: "OK",
        };
    }

    ShellTexts {
        program_name: "雀魂Plus",
        import_blocked_in_game: "游戏界面中无法导入雀魂 Plus 拓展!",
        startup_failed_title: "游戏启动失败",
        ok_button: "确定",
    }
}

pub fn resolve_shell_locale(default_shell_locale: &'static str) -> &'static str {
    for env_key in ["MAJSOUL_PLUS_LOCALE", "LC_ALL", "LANG"] {
        if let Ok(value) = env::var(env_key) {
            if let Some(locale) = normalize_shell_locale(&value) {
                return locale;
            }
        }
    }

    default_shell_locale
}

pub fn normalize_shell_locale(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw == "zh-CN" {
        return Some("zh-CN");
    }
    if raw == "en-US" {
        return Some("en-US");
    }

    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("zh") {
        return Some("zh-CN");
    }
    if lowered.starts_with("en") {
        return Some("en-US");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_texts_for_locale_returns_english_copy() {
        let texts = shell_texts_for_locale("en-US");
        assert_eq!(texts.program_name, "Majsoul Plus");
        assert_eq!(texts.ok_button, "OK");
    }

    #[test]
    fn shell_texts_for_locale_falls_back_to_zh_cn_copy() {
        let texts = shell_texts_for_locale("ja-JP");
        assert_eq!(texts.import_blocked_in_game, "游戏界面中无法导入雀魂 Plus 拓展!");
    }

    #[test]
    fn normalize_shell_locale_accepts_language_prefixes() {
        assert_eq!(normalize_shell_locale("EN_us.UTF-8"), Some("en-US"));
        assert_eq!(normalize_shell_locale("zh_TW"), Some("zh-CN"));
        assert_eq!(normalize_shell_locale("fr-FR"), None);
        assert_eq!(normalize_shell_locale("  "), None);
    }
}
