// ==========================================
// 种子包衣订单核心 - 国际化 (i18n)
// ==========================================
// 使用 rust-i18n,文案位于 locales/*.yml
// 支持英文(默认)与法文;通知标题/正文均由此渲染
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言("en" / "fr")
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 翻译消息(无参数)
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息,并替换 `%{name}` 占位符
///
/// # 示例
/// ```no_run
/// use seed_treatment::i18n::t_with_args;
/// let title = t_with_args("notification.order_ready.title", &[("lot", "LOT-42")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    args.iter()
        .fold(rust_i18n::t!(key).to_string(), |acc, (k, v)| {
            acc.replace(&format!("%{{{}}}", k), v)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // locale 为全局状态,测试并行执行时需串行化
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("fr");
        assert_eq!(current_locale(), "fr");
        set_locale("en");
        assert_eq!(current_locale(), "en");
    }

    #[test]
    fn test_translate_with_args() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        let msg = t_with_args("notification.order_ready.body", &[("lot", "LOT-42")]);
        assert!(msg.contains("LOT-42"));
        assert!(!msg.contains("%{lot}"));

        set_locale("fr");
        let msg = t_with_args("notification.order_ready.body", &[("lot", "LOT-42")]);
        assert!(msg.contains("LOT-42"));
        assert!(msg.contains("lot"));

        set_locale("en");
    }

    #[test]
    fn test_translate_simple() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(t("notification.order_ready.title"), "Order ready to treat");
    }
}
