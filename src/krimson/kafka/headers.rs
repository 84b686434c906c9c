use rdkafka::message::Headers as KafkaHeaders;

/// Ordered collection of Kafka message headers
///
/// `Headers` keeps headers as an ordered list of `(name, optional bytes)`
/// pairs. Order is preserved exactly as inserted, which matters for
/// applications that replay or mirror records byte-for-byte. Values are raw
/// bytes; use [`Headers::get_str`] for the common UTF-8 case.
///
/// # Examples
///
/// ## Creating Headers
/// ```rust
/// # use krimson::Headers;
/// let headers = Headers::new()
///     .insert("source", "web-api")
///     .insert("trace-id", "abc-123-def")
///     .insert_null("optional-field");
/// ```
///
/// ## Querying Headers
/// ```rust
/// # use krimson::Headers;
/// # let headers = Headers::new().insert("source", "web-api");
/// if let Some(source) = headers.get_str("source") {
///     println!("Source: {}", source);
/// }
///
/// for (name, value) in headers.iter() {
///     match value {
///         Some(bytes) => println!("{}: {} bytes", name, bytes.len()),
///         None => println!("{}: <null>", name),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl Headers {
    /// Creates a new empty headers collection
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates a new headers collection with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header with a value
    pub fn insert(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Appends a header with no value (null header)
    pub fn insert_null(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), None));
        self
    }

    /// Gets the last value for a header name, as raw bytes
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Gets the last value for a header name, decoded as UTF-8
    ///
    /// Returns `None` when the header is absent, null, or not valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Checks if a header exists (regardless of value)
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Returns the number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[u8]>)> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    /// Converts to rdkafka OwnedHeaders for internal use
    pub(crate) fn to_rdkafka_headers(&self) -> rdkafka::message::OwnedHeaders {
        let mut headers = rdkafka::message::OwnedHeaders::new_with_capacity(self.entries.len());

        for (name, value) in &self.entries {
            headers = headers.insert(rdkafka::message::Header {
                key: name,
                value: value.as_deref(),
            });
        }

        headers
    }

    /// Creates Headers from rdkafka headers, preserving order
    pub(crate) fn from_rdkafka_headers<H: KafkaHeaders>(kafka_headers: &H) -> Self {
        let mut entries = Vec::with_capacity(kafka_headers.count());

        for i in 0..kafka_headers.count() {
            let header = kafka_headers.get(i);
            entries.push((header.key.to_string(), header.value.map(|v| v.to_vec())));
        }

        Self { entries }
    }
}

impl FromIterator<(String, Option<Vec<u8>>)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, Option<Vec<u8>>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_creation() {
        let headers = Headers::new()
            .insert("source", "test")
            .insert("version", "1.0")
            .insert_null("optional");

        assert_eq!(headers.get_str("source"), Some("test"));
        assert_eq!(headers.get_str("version"), Some("1.0"));
        assert_eq!(headers.get("optional"), None);
        assert!(headers.contains_key("optional"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_headers_preserve_insertion_order() {
        let headers = Headers::new()
            .insert("z", "1")
            .insert("a", "2")
            .insert("m", "3");

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_duplicate_names_last_wins_on_get() {
        let headers = Headers::new().insert("source", "first").insert("source", "second");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_str("source"), Some("second"));
    }

    #[test]
    fn test_binary_values() {
        let headers = Headers::new().insert("raw", vec![0xde, 0xad, 0xbe, 0xef]);

        assert_eq!(headers.get("raw"), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(headers.get_str("raw"), None);
    }
}
