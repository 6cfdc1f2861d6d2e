use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z][A-Za-z0-9_]*)\}").unwrap());

static CHANNEL_MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<#(\d+)>").unwrap());

/// Substitute `{name}`-style placeholders in a message template.
/// Unknown placeholders are left as-is so a typo in a template stays visible.
pub fn apply_template(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Replace `<#channel_id>` mentions using `lookup`; mentions with no
/// replacement are kept verbatim.
pub fn substitute_channel_mentions<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    CHANNEL_MENTION_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
