//! Typed `WWW-Authenticate` header pointing clients at the protected
//! resource metadata, per OAuth 2.1 resource-server conventions.

use headers::{Header, HeaderName, HeaderValue};
use url::Url;

#[derive(Debug, Clone)]
pub enum WwwAuthenticate {
    Bearer { resource_metadata: Url },
}

impl Header for WwwAuthenticate {
    fn name() -> &'static HeaderName {
        &http::header::WWW_AUTHENTICATE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let text = value.to_str().map_err(|_| headers::Error::invalid())?;
        let rest = text
            .strip_prefix("Bearer resource_metadata=\"")
            .and_then(|r| r.strip_suffix('"'))
            .ok_or_else(headers::Error::invalid)?;
        let resource_metadata = Url::parse(rest).map_err(|_| headers::Error::invalid())?;
        Ok(Self::Bearer { resource_metadata })
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let Self::Bearer { resource_metadata } = self;
        let rendered = format!("Bearer resource_metadata=\"{resource_metadata}\"");
        if let Ok(value) = HeaderValue::from_str(&rendered) {
            values.extend(std::iter::once(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_header_value() {
        let header = WwwAuthenticate::Bearer {
            resource_metadata: Url::parse(
                "http://127.0.0.1:3000/.well-known/oauth-protected-resource",
            )
            .unwrap(),
        };

        let mut values = Vec::new();
        header.encode(&mut values);
        assert_eq!(values.len(), 1);
        assert!(values[0].to_str().unwrap().starts_with("Bearer "));

        let decoded = WwwAuthenticate::decode(&mut values.iter()).unwrap();
        let WwwAuthenticate::Bearer { resource_metadata } = decoded;
        assert!(resource_metadata.path().ends_with("oauth-protected-resource"));
    }
}
