//! Request and response views over CoAP messages

use crate::code::{Code, Method};
use crate::message::{Message, MessageType};
use crate::option::{number, CoapOption};
use lwm2m_core::{ContentFormat, Lwm2mError, Lwm2mResult};

/// Split a `/`-separated path into its non-empty segments
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// CoAP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: Vec<String>,
    pub queries: Vec<String>,
    pub accept: Option<ContentFormat>,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: split_path(path),
            queries: Vec::new(),
            accept: None,
            content_format: None,
            payload: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_accept(mut self, format: ContentFormat) -> Self {
        self.accept = Some(format);
        self
    }

    pub fn with_content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    /// Path segments joined with `/`, without a leading slash
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }

    /// Value of the first `name=value` query parameter
    pub fn query(&self, name: &str) -> Option<&str> {
        self.queries.iter().find_map(|query| {
            query
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn to_message(
        &self,
        message_type: MessageType,
        message_id: u16,
        token: Vec<u8>,
    ) -> Message {
        let mut message = Message::new(message_type, self.method.code(), message_id, token);
        for segment in &self.path {
            message.add_option(CoapOption::string(number::URI_PATH, segment));
        }
        if let Some(format) = self.content_format {
            message.set_uint_option(number::CONTENT_FORMAT, u32::from(format.as_u16()));
        }
        for query in &self.queries {
            message.add_option(CoapOption::string(number::URI_QUERY, query));
        }
        if let Some(format) = self.accept {
            message.set_uint_option(number::ACCEPT, u32::from(format.as_u16()));
        }
        message.payload = self.payload.clone();
        message
    }

    /// Build a request view of an inbound message
    ///
    /// # Errors
    /// Returns `InvalidData` if the code is not a request method or one of
    /// the path/query/format options is malformed
    pub fn from_message(message: &Message) -> Lwm2mResult<Self> {
        let method = Method::from_code(message.code)?;
        Ok(Self {
            method,
            path: message.string_options(number::URI_PATH)?,
            queries: message.string_options(number::URI_QUERY)?,
            accept: format_option(message, number::ACCEPT)?,
            content_format: format_option(message, number::CONTENT_FORMAT)?,
            payload: message.payload.clone(),
        })
    }
}

/// CoAP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: Code,
    pub content_format: Option<ContentFormat>,
    pub location_path: Vec<String>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            content_format: None,
            location_path: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location_path = split_path(location);
        self
    }

    /// Location-Path segments joined with `/`
    pub fn location(&self) -> String {
        self.location_path.join("/")
    }

    /// Payload decoded as UTF-8, invalid sequences replaced
    pub fn payload_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn to_message(
        &self,
        message_type: MessageType,
        message_id: u16,
        token: Vec<u8>,
    ) -> Message {
        let mut message = Message::new(message_type, self.code, message_id, token);
        for segment in &self.location_path {
            message.add_option(CoapOption::string(number::LOCATION_PATH, segment));
        }
        if let Some(format) = self.content_format {
            message.set_uint_option(number::CONTENT_FORMAT, u32::from(format.as_u16()));
        }
        message.payload = self.payload.clone();
        message
    }

    pub fn from_message(message: &Message) -> Lwm2mResult<Self> {
        if !message.code.is_response() {
            return Err(Lwm2mError::InvalidData(format!(
                "Not a response code: {}",
                message.code
            )));
        }
        Ok(Self {
            code: message.code,
            content_format: format_option(message, number::CONTENT_FORMAT)?,
            location_path: message.string_options(number::LOCATION_PATH)?,
            payload: message.payload.clone(),
        })
    }
}

fn format_option(message: &Message, option: u16) -> Lwm2mResult<Option<ContentFormat>> {
    match message.uint_option(option)? {
        Some(value) => {
            let value = u16::try_from(value).map_err(|_| {
                Lwm2mError::InvalidData(format!("Content format out of range: {}", value))
            })?;
            Ok(Some(ContentFormat::from_u16(value)))
        }
        None => Ok(None),
    }
}
