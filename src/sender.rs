//! Sender name normalization to `Name@Realm`.
//! The host decorates names with private-use glyphs (party slot numbers,
//! role icons) and joins cross-realm names with its own realm glyph instead of '@'.

/// Glyph the host places between a cross-realm player's name and realm.
pub const CROSS_REALM_GLYPH: char = '\u{E05D}';

fn is_private_use(c: char) -> bool {
    ('\u{E000}'..='\u{F8FF}').contains(&c)
}

/// The local character, used to fill in missing realms and outgoing tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    pub realm: Option<String>,
}

impl LocalIdentity {
    /// Parse `Name@Realm` (or a bare name). Blank input yields None.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, realm) = split_name(raw);
        if name.is_empty() {
            return None;
        }
        Some(Self { name, realm })
    }

    pub fn display(&self) -> String {
        join(&self.name, self.realm.as_deref())
    }
}

/// Normalize a raw sender. Realm resolution order: explicit in the name,
/// the event's realm hint, then the local character's realm.
/// An empty sender is the local character (the host reports own tells that way).
pub fn normalize_sender(raw: &str, realm_hint: Option<&str>, local: Option<&LocalIdentity>) -> String {
    let (name, realm) = split_name(raw);
    if name.is_empty() {
        return local.map(LocalIdentity::display).unwrap_or_default();
    }

    let realm = realm
        .or_else(|| {
            realm_hint
                .map(clean)
                .filter(|r| !r.is_empty())
        })
        .or_else(|| local.and_then(|l| l.realm.clone()));
    join(&name, realm.as_deref())
}

fn split_name(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim_start_matches(|c: char| is_private_use(c) || c.is_whitespace());
    let split = trimmed
        .split_once('@')
        .or_else(|| trimmed.split_once(CROSS_REALM_GLYPH));
    match split {
        Some((name, realm)) => {
            let realm = clean(realm);
            (clean(name), (!realm.is_empty()).then_some(realm))
        }
        None => (clean(trimmed), None),
    }
}

fn clean(part: &str) -> String {
    part.chars()
        .filter(|c| !is_private_use(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn join(name: &str, realm: Option<&str>) -> String {
    match realm {
        Some(realm) => format!("{name}@{realm}"),
        None => name.to_string(),
    }
}
