//! Typed proxies calling an in-process service over the memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use svcmodel_channels::{
    BindingElement, CustomBinding, MemoryHub, MemorySession, MemoryTransportBindingElement,
    MessageEncodingBindingElement, TransportBindingElement,
};
use svcmodel_client::{
    ChannelFactory, ClientMessageInspector, ClientRuntime, ClientRuntimeChannel,
    ContractDescription, CorrelationState, DataContractFormatter, EndpointBehavior,
    InteractiveChannelInitializer, OperationResult, OperationSelector, ServiceContract,
    ServiceEndpoint, service_contract,
};
use svcmodel_core::{
    CommunicationObject, CommunicationState, EndpointAddress, Error, FaultCode, Message,
    MessageFault, MessageHeader, MessageVersion, Result, Timeouts,
};
use url::Url;

const VERSION: MessageVersion = MessageVersion::SOAP12_WSADDRESSING10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MathFault {
    operation: String,
    problem: String,
}

service_contract! {
    /// Arithmetic with a log
    pub contract Calculator {
        name: "ICalculator",
        namespace: "urn:tests:calc",
        proxy: CalculatorClient,
        operations {
            call fn add(a: i32, b: i32) -> i32 => "Add" async(begin_add, end_add);
            call fn divide(a: f64, b: f64) -> f64 => "Divide" faults [MathFault => "MathFault"];
            call fn crash() -> () => "Crash";
            call fn stall() -> () => "Stall";
            oneway fn log(line: String) -> () => "Log";
            call fn logged() -> Vec<String> => "Logged";
        }
    }
}

fn binding(send: Duration) -> CustomBinding {
    CustomBinding::new(vec![
        BindingElement::Encoding(MessageEncodingBindingElement::binary(VERSION)),
        BindingElement::Transport(TransportBindingElement::Memory(
            MemoryTransportBindingElement::default(),
        )),
    ])
    .with_timeouts(Timeouts {
        send,
        ..Timeouts::fast()
    })
}

/// Registers a calculator service at `memory://client-tests/{path}`.
fn host(path: &str) -> EndpointAddress {
    let uri = Url::parse(&format!("memory://client-tests/{}", path)).unwrap();
    let listener = MemoryHub::global()
        .listen(&uri, MessageEncodingBindingElement::binary(VERSION).create_encoder())
        .unwrap();
    let contract = Arc::new(Calculator::describe().unwrap());
    let log = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(async move {
        while let Some(session) = listener.accept().await {
            tokio::spawn(serve(session, contract.clone(), log.clone()));
        }
    });
    EndpointAddress::new(uri)
}

async fn serve(session: MemorySession, contract: Arc<ContractDescription>, log: Arc<Mutex<Vec<String>>>) {
    let formatter = DataContractFormatter;
    while let Ok(Some(mut request)) = session.receive().await {
        let action = request.action().unwrap_or_default().to_string();
        let Some(op) = contract.find_by_action(&action) else {
            continue;
        };
        let args = formatter.deserialize_request(&mut request, op).unwrap();
        let outcome: std::result::Result<Value, (MessageFault, Option<String>)> = match op.name.as_str() {
            "Add" => Ok(json!(args[0].as_i64().unwrap() + args[1].as_i64().unwrap())),
            "Divide" => {
                let (a, b) = (args[0].as_f64().unwrap(), args[1].as_f64().unwrap());
                if b == 0.0 {
                    let contract = &op.fault_contracts[0];
                    let fault = MessageFault::new(FaultCode::sender(VERSION.envelope), "division by zero")
                        .with_detail(
                            contract.detail_name.clone(),
                            contract.detail_namespace.clone(),
                            &MathFault {
                                operation: "Divide".into(),
                                problem: "divide by zero".into(),
                            },
                        )
                        .unwrap();
                    Err((fault, Some(contract.action.clone())))
                } else {
                    Ok(json!(a / b))
                }
            }
            "Crash" => Err((
                MessageFault::new(FaultCode::receiver(VERSION.envelope), "the service crashed"),
                None,
            )),
            "Stall" => continue,
            "Log" => {
                log.lock().push(args[0].as_str().unwrap_or_default().to_string());
                continue;
            }
            "Logged" => Ok(json!(*log.lock())),
            _ => continue,
        };
        let mut reply = match outcome {
            Ok(value) => formatter
                .serialize_reply(VERSION, op, &OperationResult::new(value, Vec::new()))
                .unwrap(),
            Err((fault, action)) => Message::create_fault(VERSION, fault, action),
        };
        reply.headers_mut().relates_to = request.headers().message_id.clone();
        if session.send(reply).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn request_reply_round_trip() {
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("add")).unwrap();
    let client = factory.create_channel().await.unwrap();
    assert_eq!(client.channel().state(), CommunicationState::Created);

    assert_eq!(client.add(2, 3).await.unwrap(), 5);
    assert_eq!(client.channel().state(), CommunicationState::Opened);
    assert_eq!(client.divide(7.0, 2.0).await.unwrap(), 3.5);

    let metrics = client.channel().metrics();
    assert_eq!(metrics.requests, 2);
    assert_eq!(metrics.replies, 2);
    assert_eq!(metrics.faults, 0);

    factory.close().await.unwrap();
    assert_eq!(client.channel().state(), CommunicationState::Closed);
    assert!(matches!(client.add(1, 1).await, Err(Error::ObjectDisposed(_))));
}

#[tokio::test]
async fn declared_faults_carry_typed_details() {
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("faults")).unwrap();
    let client = factory.create_channel().await.unwrap();

    let err = client.divide(1.0, 0.0).await.unwrap_err();
    let typed = err.typed_fault::<MathFault>().expect("typed fault");
    assert_eq!(typed.detail.problem, "divide by zero");
    assert_eq!(typed.fault.reason().text(), "division by zero");
    assert_eq!(typed.fault.action(), Some("urn:tests:calc/ICalculator/DivideMathFaultFault"));

    let err = client.crash().await.unwrap_err();
    let fault = err.as_fault().expect("plain fault");
    assert!(!fault.has_typed_detail());
    assert!(fault.code().is_receiver_fault());
    assert_eq!(fault.reason().text(), "the service crashed");

    // faults leave the channel usable
    assert_eq!(client.channel().state(), CommunicationState::Opened);
    assert_eq!(client.add(1, 1).await.unwrap(), 2);
    assert_eq!(client.channel().metrics().faults, 2);
}

#[tokio::test]
async fn unanswered_requests_time_out() {
    let factory =
        ChannelFactory::<Calculator>::new(binding(Duration::from_millis(300)), host("stall")).unwrap();
    let client = factory.create_channel().await.unwrap();

    let err = client.stall().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(client.channel().state(), CommunicationState::Opened);
    assert_eq!(client.add(4, 4).await.unwrap(), 8);
    assert_eq!(client.channel().metrics().timeouts, 1);
}

#[tokio::test]
async fn one_way_calls_do_not_wait() {
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("log")).unwrap();
    let client = factory.create_channel().await.unwrap();

    client.log("first".into()).await.unwrap();
    client.log("second".into()).await.unwrap();
    assert_eq!(client.logged().await.unwrap(), vec!["first", "second"]);
    assert_eq!(client.channel().metrics().one_way_sends, 2);
}

#[tokio::test]
async fn begin_end_pairs() {
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("async")).unwrap();
    let a = factory.create_channel().await.unwrap();
    let b = factory.create_channel().await.unwrap();
    assert_eq!(factory.channel_count(), 2);

    let call = a.begin_add(20, 22).unwrap();
    assert_eq!(a.end_add(call).await.unwrap(), 42);

    let call = a.begin_add(1, 2).unwrap();
    assert!(matches!(b.end_add(call).await, Err(Error::InvalidOperation(_))));
}

#[derive(Debug, Default)]
struct Stamp {
    sent: AtomicUsize,
    received: AtomicUsize,
    matched: AtomicUsize,
}

impl ClientMessageInspector for Stamp {
    fn before_send_request(
        &self,
        request: &mut Message,
        _channel: &ClientRuntimeChannel,
    ) -> Result<CorrelationState> {
        request
            .headers_mut()
            .insert(MessageHeader::new("Tenant", "urn:tests", json!("blue")));
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(request.action().unwrap_or_default().to_string())))
    }

    fn after_receive_reply(&self, reply: &mut Message, state: CorrelationState) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        let sent = state
            .and_then(|s| s.downcast::<String>().ok())
            .expect("correlation state");
        if reply.action() == Some(format!("{}Response", sent).as_str()) {
            self.matched.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Routes `Stall` calls to `Crash`.
#[derive(Debug)]
struct NoStalls;

impl OperationSelector for NoStalls {
    fn select_operation(&self, method: &str, _parameters: &[Value]) -> Result<String> {
        Ok(match method {
            "Stall" => "Crash".to_string(),
            other => other.to_string(),
        })
    }
}

#[derive(Debug)]
struct Instrument(Arc<Stamp>);

impl EndpointBehavior for Instrument {
    fn apply_client_behavior(&self, _endpoint: &ServiceEndpoint, runtime: &mut ClientRuntime) -> Result<()> {
        runtime.add_message_inspector(self.0.clone());
        runtime.operation_selector = Some(Arc::new(NoStalls));
        Ok(())
    }
}

#[tokio::test]
async fn behaviors_install_inspectors_and_selectors() {
    let stamp = Arc::new(Stamp::default());
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("inspect")).unwrap();
    factory.add_behavior(Arc::new(Instrument(stamp.clone()))).unwrap();
    let client = factory.create_channel().await.unwrap();

    assert_eq!(client.add(1, 2).await.unwrap(), 3);
    assert_eq!(stamp.sent.load(Ordering::SeqCst), 1);
    assert_eq!(stamp.matched.load(Ordering::SeqCst), 1);

    // selected operation, not a timeout
    let err = client.stall().await.unwrap_err();
    assert!(err.is_fault());
    assert_eq!(stamp.sent.load(Ordering::SeqCst), 2);
    assert_eq!(stamp.matched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_way_calls_skip_after_receive_reply() {
    let stamp = Arc::new(Stamp::default());
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("inspect-one-way")).unwrap();
    factory.add_behavior(Arc::new(Instrument(stamp.clone()))).unwrap();
    let client = factory.create_channel().await.unwrap();

    client.log("quiet".to_string()).await.unwrap();
    assert_eq!(stamp.sent.load(Ordering::SeqCst), 1);
    assert_eq!(stamp.received.load(Ordering::SeqCst), 0);

    assert_eq!(client.logged().await.unwrap(), vec!["quiet".to_string()]);
    assert_eq!(stamp.sent.load(Ordering::SeqCst), 2);
    assert_eq!(stamp.received.load(Ordering::SeqCst), 1);
    assert_eq!(stamp.matched.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Default)]
struct Consent(AtomicUsize);

#[async_trait]
impl InteractiveChannelInitializer for Consent {
    async fn display_initialization_ui(&self, _channel: &ClientRuntimeChannel) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct RequireConsent(Arc<Consent>);

impl EndpointBehavior for RequireConsent {
    fn apply_client_behavior(&self, _endpoint: &ServiceEndpoint, runtime: &mut ClientRuntime) -> Result<()> {
        runtime.interactive_channel_initializers.push(self.0.clone());
        Ok(())
    }
}

#[tokio::test]
async fn interactive_initializers_gate_open() {
    let consent = Arc::new(Consent::default());
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("consent")).unwrap();
    factory.add_behavior(Arc::new(RequireConsent(consent.clone()))).unwrap();

    let refused = factory.create_channel().await.unwrap();
    assert!(matches!(refused.add(1, 1).await, Err(Error::InvalidOperation(_))));
    assert_eq!(refused.channel().state(), CommunicationState::Faulted);

    let client = factory.create_channel().await.unwrap();
    client.channel().display_initialization_ui().await.unwrap();
    assert_eq!(consent.0.load(Ordering::SeqCst), 1);
    assert_eq!(client.add(2, 2).await.unwrap(), 4);
    assert!(client.channel().display_initialization_ui().await.is_err());
}

#[tokio::test]
async fn missing_listener_is_endpoint_not_found() {
    let address = EndpointAddress::parse("memory://client-tests/nobody").unwrap();
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), address).unwrap();
    let client = factory.create_channel().await.unwrap();
    let err = client.add(1, 1).await.unwrap_err();
    assert!(matches!(err, Error::EndpointNotFound(_)), "{err}");
}

#[tokio::test]
async fn operation_timeout_is_per_channel() {
    let factory = ChannelFactory::<Calculator>::new(binding(Duration::from_secs(5)), host("optimeout")).unwrap();
    let client = factory.create_channel().await.unwrap();
    assert_eq!(client.channel().operation_timeout(), Duration::from_secs(5));
    client.channel().set_operation_timeout(Duration::from_millis(200));

    let started = std::time::Instant::now();
    assert!(client.stall().await.unwrap_err().is_timeout());
    assert!(started.elapsed() < Duration::from_secs(2));
}
