//! `WWW-Authenticate: Bearer` challenge parsing

/// A bearer challenge: where to get a token and for what.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `None` for non-bearer schemes or a challenge without a realm.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut challenge = Self::default();
        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value,
                "service" => challenge.service = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }

        if challenge.realm.is_empty() {
            None
        } else {
            Some(challenge)
        }
    }

    /// Token endpoint URL with the service and scope query parameters.
    #[must_use]
    pub fn token_url(&self) -> String {
        let mut query = Vec::new();
        if let Some(service) = &self.service {
            query.push(format!("service={}", urlencoding::encode(service)));
        }
        if let Some(scope) = &self.scope {
            query.push(format!("scope={}", urlencoding::encode(scope)));
        }
        if query.is_empty() {
            self.realm.clone()
        } else {
            let separator = if self.realm.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.realm, separator, query.join("&"))
        }
    }
}

/// Split `k1="v1",k2=v2` into pairs; commas inside quotes are kept.
fn parse_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = params.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }

    pairs
}
