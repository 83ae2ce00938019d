use std::collections::HashMap;

/// Default key expression handed to key resolvers. Resolvers recognize it as
/// "partition by client IP".
pub const DEFAULT_KEY_EXPRESSION: &str = "#ip";

/// Placeholder for an unknown caller address.
pub const UNKNOWN_REMOTE_ADDRESS: &str = "unknown";

/// Immutable per-request context handed to the engine and to key resolvers.
///
/// Every field is owned: builder inputs are copied, so the context never
/// aliases caller storage and can outlive the request objects it was built
/// from. Header key case is preserved as supplied; lookups are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    key_expression: String,
    principal: Option<String>,
    remote_address: String,
    method_arguments: Vec<String>,
    request_headers: HashMap<String, String>,
    method_signature: Option<String>,
}

impl RequestContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn key_expression(&self) -> &str {
        &self.key_expression
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn method_arguments(&self) -> &[String] {
        &self.method_arguments
    }

    pub fn request_headers(&self) -> &HashMap<String, String> {
        &self.request_headers
    }

    pub fn method_signature(&self) -> Option<&str> {
        self.method_signature.as_deref()
    }

    /// Case-insensitive header lookup (header names keep their original case
    /// in storage).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        ContextBuilder::default().build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    key_expression: Option<String>,
    principal: Option<String>,
    remote_address: Option<String>,
    method_arguments: Vec<String>,
    request_headers: HashMap<String, String>,
    method_signature: Option<String>,
}

impl ContextBuilder {
    pub fn key_expression(mut self, expression: impl Into<String>) -> Self {
        self.key_expression = Some(expression.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Replaces the argument list with a copy of `arguments`, preserving order.
    pub fn method_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.method_arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the header map with a copy of `headers`. Key case is kept.
    pub fn request_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.request_headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn method_signature(mut self, signature: impl Into<String>) -> Self {
        self.method_signature = Some(signature.into());
        self
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            key_expression: self
                .key_expression
                .unwrap_or_else(|| DEFAULT_KEY_EXPRESSION.to_string()),
            principal: self.principal,
            remote_address: self
                .remote_address
                .unwrap_or_else(|| UNKNOWN_REMOTE_ADDRESS.to_string()),
            method_arguments: self.method_arguments,
            request_headers: self.request_headers,
            method_signature: self.method_signature,
        }
    }
}
