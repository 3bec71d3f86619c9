//! Well-known namespaces, actions, content types and limits.

/// SOAP 1.1 envelope namespace.
pub const SOAP11_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// WS-Addressing 1.0 namespace.
pub const WSA10_NAMESPACE: &str = "http://www.w3.org/2005/08/addressing";
/// WS-Addressing August 2004 namespace.
pub const WSA_AUGUST2004_NAMESPACE: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";

/// Anonymous address under WS-Addressing 1.0.
pub const WSA10_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";
/// Anonymous address under WS-Addressing August 2004.
pub const WSA_AUGUST2004_ANONYMOUS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

/// Generic fault action under WS-Addressing 1.0.
pub const WSA10_FAULT_ACTION: &str = "http://www.w3.org/2005/08/addressing/fault";
/// Generic fault action under WS-Addressing August 2004.
pub const WSA_AUGUST2004_FAULT_ACTION: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/fault";

/// Fault action used by the service dispatcher when no contract action applies.
pub const DISPATCHER_FAULT_ACTION: &str =
    "http://schemas.microsoft.com/net/2005/12/windowscommunicationfoundation/dispatcher/fault";

/// Namespace used for contracts that do not declare one.
pub const DEFAULT_NAMESPACE: &str = "http://tempuri.org/";

/// Namespace of the built-in [`ExceptionDetail`](crate::ExceptionDetail) fault detail.
pub const EXCEPTION_DETAIL_NAMESPACE: &str =
    "http://schemas.datacontract.org/2004/07/System.ServiceModel";

/// WS-Security extension namespace.
pub const WSSE_NAMESPACE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

/// Subcode reported when the service has no operation for the request action.
pub const ACTION_NOT_SUPPORTED: &str = "ActionNotSupported";
/// Subcode reported when no endpoint listens at the destination.
pub const DESTINATION_UNREACHABLE: &str = "DestinationUnreachable";

/// Suffix appended to an operation action to form its default reply action.
pub const REPLY_ACTION_SUFFIX: &str = "Response";

/// Default bound on the size of a fault accepted by the client runtime.
pub const DEFAULT_MAX_FAULT_SIZE: usize = 64 * 1024;
/// Default bound on a received message.
pub const DEFAULT_MAX_RECEIVED_MESSAGE_SIZE: usize = 64 * 1024;
/// Default buffer pool size.
pub const DEFAULT_MAX_BUFFER_POOL_SIZE: usize = 512 * 1024;

/// Content type of SOAP 1.1 text messages.
pub const TEXT_XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
/// Content type of SOAP 1.2 text messages.
pub const SOAP12_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
/// Content type of binary encoded messages.
pub const BINARY_CONTENT_TYPE: &str = "application/soap+msbin1";
/// Content type of MTOM encoded messages.
pub const MTOM_CONTENT_TYPE: &str = "multipart/related; type=\"application/xop+xml\"";
