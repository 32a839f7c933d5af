//! 连接器生命周期与对端校验的集成测试。
//!
//! 使用计数型假引擎观察工厂构造与释放次数；授权检查能力同样以计数闭包实现，
//! 用于确认同步与异步两条完成路径得到相同的结局。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use spark_security_spiffe::{
    AlpnError, AuthContext, AuthorizationCheckRequest, ClientCertRequestType,
    ClientHandshakerFactory, CompletionMode, ConnectionArgs, HandshakeEngine, HandshakeEngineError,
    HandshakeSide, KeyMaterialsConfig, PeerCheckedCallback, PemKeyCertPair, ReloadError,
    ReloadStatus, SecurityConnector, SecurityError, SecurityHandshaker, ServerHandshakerFactory,
    SpiffeChannelSecurityConnector, SpiffeCredentials, SpiffeServerCredentials,
    SpiffeServerSecurityConnector, TlsCredentialsOptions, credential_reload_fn,
    peer::{Peer, SSL_ALPN_SELECTED_PROTOCOL, X509_PEM_CERT_PROPERTY},
    server_authorization_check_fn,
};
use spark_transport_core::{LogSeverity, StatusCode, test_stubs::RecordingLogger};

#[derive(Default)]
struct Counters {
    client_builds: AtomicUsize,
    server_builds: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone, Default)]
struct CountingEngine {
    counters: Arc<Counters>,
}

struct CountingFactory {
    generation: usize,
    counters: Arc<Counters>,
    cert_request_type: ClientCertRequestType,
}

impl Drop for CountingFactory {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, PartialEq, Eq)]
struct FakeHandshaker {
    generation: usize,
    server_name: Option<String>,
}

impl ClientHandshakerFactory for CountingFactory {
    type Handshaker = FakeHandshaker;

    fn create_handshaker(
        &self,
        server_name: &str,
    ) -> Result<Self::Handshaker, HandshakeEngineError> {
        if server_name.starts_with("invalid") {
            return Err(HandshakeEngineError::InvalidServerName(server_name.to_owned()));
        }
        Ok(FakeHandshaker {
            generation: self.generation,
            server_name: Some(server_name.to_owned()),
        })
    }
}

impl ServerHandshakerFactory for CountingFactory {
    type Handshaker = FakeHandshaker;

    fn create_handshaker(&self) -> Result<Self::Handshaker, HandshakeEngineError> {
        Ok(FakeHandshaker {
            generation: self.generation,
            server_name: None,
        })
    }
}

impl HandshakeEngine for CountingEngine {
    type ClientFactory = CountingFactory;
    type ServerFactory = CountingFactory;
    type SessionCache = ();

    fn create_client_factory(
        &self,
        pem_key_cert_pairs: &[PemKeyCertPair],
        _pem_root_certs: Option<&str>,
        _session_cache: Option<()>,
        _alpn_protocols: &[String],
    ) -> Result<CountingFactory, HandshakeEngineError> {
        if pem_key_cert_pairs[0].private_key() == "broken" {
            return Err(HandshakeEngineError::Config("unusable key".into()));
        }
        let generation = self.counters.client_builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CountingFactory {
            generation,
            counters: Arc::clone(&self.counters),
            cert_request_type: ClientCertRequestType::DontRequest,
        })
    }

    fn create_server_factory(
        &self,
        _pem_key_cert_pairs: &[PemKeyCertPair],
        _pem_root_certs: Option<&str>,
        cert_request_type: ClientCertRequestType,
        _alpn_protocols: &[String],
    ) -> Result<CountingFactory, HandshakeEngineError> {
        let generation = self.counters.server_builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CountingFactory {
            generation,
            counters: Arc::clone(&self.counters),
            cert_request_type,
        })
    }
}

type Outcomes = Arc<Mutex<Vec<Result<Arc<AuthContext>, SecurityError>>>>;

fn capture() -> (PeerCheckedCallback, Outcomes) {
    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    let callback: PeerCheckedCallback = Box::new(move |result| sink.lock().push(result));
    (callback, outcomes)
}

fn materials(key: &str) -> KeyMaterialsConfig {
    let pair = PemKeyCertPair::new(key, "chain").expect("valid pair");
    KeyMaterialsConfig::new().with_key_materials(Some("roots".into()), vec![pair])
}

fn static_options() -> TlsCredentialsOptions {
    TlsCredentialsOptions::new().with_key_materials(materials("key"))
}

fn h2_peer_with_cert() -> Peer {
    Peer::new()
        .with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2")
        .with_property(X509_PEM_CERT_PROPERTY, "-----BEGIN CERTIFICATE-----")
}

fn channel(
    engine: &CountingEngine,
    options: TlsCredentialsOptions,
) -> SpiffeChannelSecurityConnector<CountingEngine> {
    SpiffeChannelSecurityConnector::builder(
        engine.clone(),
        SpiffeCredentials::new(options),
        "backend.example.com:443",
    )
    .create()
    .expect("connector")
}

#[test]
fn creation_without_any_material_fails_with_precondition() {
    let engine = CountingEngine::default();
    let logger = RecordingLogger::new();
    let result = SpiffeChannelSecurityConnector::builder(
        engine.clone(),
        SpiffeCredentials::new(TlsCredentialsOptions::new()),
        "backend.example.com",
    )
    .logger(Arc::new(logger.clone()))
    .create();

    assert_eq!(
        result.map(|_| ()),
        Err(SecurityError::KeyMaterials(ReloadError::Precondition))
    );
    assert_eq!(engine.counters.client_builds.load(Ordering::SeqCst), 0);
    assert!(logger.contains("Could not initialize client handshaker factory."));
    assert!(logger.contains("Either credential reload config or key materials should be provisioned."));
}

#[test]
fn empty_target_name_is_rejected() {
    let result = SpiffeChannelSecurityConnector::builder(
        CountingEngine::default(),
        SpiffeCredentials::new(static_options()),
        "",
    )
    .create();
    assert_eq!(result.map(|_| ()), Err(SecurityError::InvalidTargetName));
}

#[test]
fn unchanged_reload_reuses_the_factory() {
    let engine = CountingEngine::default();
    let options = static_options().with_credential_reload(credential_reload_fn(|arg| {
        arg.set_status(ReloadStatus::Unchanged);
        CompletionMode::Synchronous
    }));
    let connector = channel(&engine, options);
    assert_eq!(connector.target_name(), "backend.example.com");

    let mut handshakers: Vec<SecurityHandshaker<FakeHandshaker>> = Vec::new();
    for _ in 0..3 {
        connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);
    }

    assert_eq!(engine.counters.client_builds.load(Ordering::SeqCst), 1);
    assert_eq!(handshakers.len(), 3);
    for handshaker in &handshakers {
        assert_eq!(handshaker.side(), HandshakeSide::Client);
        assert_eq!(
            handshaker.handshaker(),
            &FakeHandshaker {
                generation: 1,
                server_name: Some("backend.example.com".into()),
            }
        );
    }
}

#[test]
fn new_materials_release_the_old_factory_and_rebuild() {
    let engine = CountingEngine::default();
    let rotations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&rotations);
    let options = static_options().with_credential_reload(credential_reload_fn(move |arg| {
        let rotation = seen.fetch_add(1, Ordering::SeqCst);
        // 首次为初始化，之后每次都下发新材料。
        if rotation > 0 {
            arg.set_key_materials(Some("roots-v2".into()), vec![
                PemKeyCertPair::new(format!("key-{rotation}"), "chain").expect("pair"),
            ]);
            arg.set_status(ReloadStatus::New);
        }
        CompletionMode::Synchronous
    }));
    let connector = channel(&engine, options);
    let first = connector.handshaker_factory().expect("initial factory");
    assert_eq!(first.generation, 1);
    drop(first);

    let mut handshakers: Vec<SecurityHandshaker<FakeHandshaker>> = Vec::new();
    connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);

    assert_eq!(engine.counters.client_builds.load(Ordering::SeqCst), 2);
    assert_eq!(engine.counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(handshakers[0].handshaker().generation, 2);
    assert_eq!(connector.key_materials().pem_root_certs(), Some("roots-v2"));
}

#[test]
fn failed_rebuild_leaves_no_factory_until_the_next_success() {
    let engine = CountingEngine::default();
    let next_key = Arc::new(Mutex::new(None::<String>));
    let source = Arc::clone(&next_key);
    let options = static_options().with_credential_reload(credential_reload_fn(move |arg| {
        if let Some(key) = source.lock().take() {
            arg.set_key_materials(None, vec![PemKeyCertPair::new(key, "chain").expect("pair")]);
            arg.set_status(ReloadStatus::New);
        }
        CompletionMode::Synchronous
    }));
    let logger = RecordingLogger::new();
    let connector = SpiffeChannelSecurityConnector::builder(
        engine.clone(),
        SpiffeCredentials::new(options),
        "backend.example.com",
    )
    .logger(Arc::new(logger.clone()))
    .create()
    .expect("connector");

    *next_key.lock() = Some("broken".into());
    let mut handshakers: Vec<SecurityHandshaker<FakeHandshaker>> = Vec::new();
    connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);
    assert!(handshakers.is_empty());
    assert!(connector.handshaker_factory().is_none());
    assert!(logger.contains("Handshaker factory refresh failed."));

    // 材料未再变化：工厂保持为空，依旧无法创建握手器。
    connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);
    assert!(handshakers.is_empty());

    *next_key.lock() = Some("fixed".into());
    connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);
    assert_eq!(handshakers.len(), 1);
    assert_eq!(engine.counters.client_builds.load(Ordering::SeqCst), 2);
}

#[test]
fn overridden_target_name_drives_handshaker_creation() {
    let engine = CountingEngine::default();
    let logger = RecordingLogger::new();
    let connector = SpiffeChannelSecurityConnector::builder(
        engine,
        SpiffeCredentials::new(static_options()),
        "10.0.0.7:8443",
    )
    .overridden_target_name("invalid.test")
    .logger(Arc::new(logger.clone()))
    .create()
    .expect("connector");
    assert_eq!(connector.server_name(), "invalid.test");

    let mut handshakers: Vec<SecurityHandshaker<FakeHandshaker>> = Vec::new();
    connector.add_handshakers(&ConnectionArgs::new().with("attempt", "1"), &mut handshakers);
    assert!(handshakers.is_empty());
    assert!(logger.contains(
        "Handshaker creation failed with error invalid server name `invalid.test`."
    ));
    assert_eq!(logger.count(LogSeverity::Error), 1);
}

#[test]
fn missing_pem_property_fails_without_invoking_the_check() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&invocations);
    let options = static_options().with_server_authorization_check(
        server_authorization_check_fn(move |request: &AuthorizationCheckRequest| {
            counted.fetch_add(1, Ordering::SeqCst);
            request.set_result(StatusCode::Ok, true, None);
            CompletionMode::Synchronous
        }),
    );
    let connector = channel(&CountingEngine::default(), options);

    let (callback, outcomes) = capture();
    connector.check_peer(Peer::new().with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2"), callback);

    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].as_ref().map(|_| ()),
        Err(&SecurityError::AuthorizationMissingProperty)
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn alpn_failures_are_reported_before_authorization() {
    let connector = channel(&CountingEngine::default(), static_options());

    let (callback, outcomes) = capture();
    connector.check_peer(Peer::new(), callback);
    let (callback, invalid) = capture();
    connector.check_peer(
        Peer::new().with_property(SSL_ALPN_SELECTED_PROTOCOL, "http/1.1"),
        callback,
    );

    assert_eq!(
        outcomes.lock()[0].as_ref().map(|_| ()),
        Err(&SecurityError::Alpn(AlpnError::MissingSelectedProtocol))
    );
    assert_eq!(
        invalid.lock()[0].as_ref().map(|_| ()),
        Err(&SecurityError::Alpn(AlpnError::InvalidProtocol))
    );
}

#[test]
fn without_a_check_the_peer_is_accepted() {
    let connector = channel(&CountingEngine::default(), static_options());
    let (callback, outcomes) = capture();
    connector.check_peer(h2_peer_with_cert(), callback);

    let outcomes = outcomes.lock();
    let context = outcomes[0].as_ref().expect("accepted");
    assert_eq!(context.transport_security_type(), Some("spiffe"));
}

type Verdict = (StatusCode, bool, Option<&'static str>);

const VERDICTS: [Verdict; 5] = [
    (StatusCode::Ok, true, None),
    (StatusCode::Ok, false, Some("spiffe id not allowed")),
    (StatusCode::Cancelled, false, Some("caller went away")),
    (StatusCode::Unavailable, true, Some("policy engine down")),
    (StatusCode::Internal, false, None),
];

fn sync_outcome(verdict: Verdict) -> Result<(), SecurityError> {
    let (status, success, details) = verdict;
    let options = static_options().with_server_authorization_check(server_authorization_check_fn(
        move |request: &AuthorizationCheckRequest| {
            assert_eq!(request.target_name().as_deref(), Some("backend.example.com"));
            request.set_result(status, success, details.map(str::to_owned));
            CompletionMode::Synchronous
        },
    ));
    let connector = channel(&CountingEngine::default(), options);
    let (callback, outcomes) = capture();
    connector.check_peer(h2_peer_with_cert(), callback);
    let mut outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    outcomes.remove(0).map(|_| ())
}

fn async_outcome(verdict: Verdict) -> Result<(), SecurityError> {
    let (status, success, details) = verdict;
    let parked: Arc<Mutex<Option<AuthorizationCheckRequest>>> = Arc::default();
    let slot = Arc::clone(&parked);
    let options = static_options().with_server_authorization_check(server_authorization_check_fn(
        move |request: &AuthorizationCheckRequest| {
            *slot.lock() = Some(request.clone());
            CompletionMode::Asynchronous
        },
    ));
    let connector = channel(&CountingEngine::default(), options);
    let (callback, outcomes) = capture();
    connector.check_peer(h2_peer_with_cert(), callback);
    assert!(outcomes.lock().is_empty(), "异步路径在完成前不得回调");

    let request = parked.lock().take().expect("check scheduled");
    assert!(request.is_pending());
    assert_eq!(
        request.peer_cert().as_deref(),
        Some("-----BEGIN CERTIFICATE-----")
    );
    request.set_result(status, success, details.map(str::to_owned));
    request.complete();
    assert!(!request.is_pending());

    let mut outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    outcomes.remove(0).map(|_| ())
}

#[test]
fn sync_and_async_completion_agree() {
    for verdict in VERDICTS {
        assert_eq!(sync_outcome(verdict), async_outcome(verdict), "{verdict:?}");
    }
    assert_eq!(sync_outcome(VERDICTS[0]), Ok(()));
    assert_eq!(
        sync_outcome(VERDICTS[3]),
        Err(SecurityError::AuthorizationIncomplete {
            status: StatusCode::Unavailable,
            details: "policy engine down".into(),
        })
    );
}

#[test]
fn overlapping_checks_abort_the_superseded_callback_and_share_the_first_inputs() {
    let parked: Arc<Mutex<Option<AuthorizationCheckRequest>>> = Arc::default();
    let slot = Arc::clone(&parked);
    let options = static_options().with_server_authorization_check(server_authorization_check_fn(
        move |request: &AuthorizationCheckRequest| {
            *slot.lock() = Some(request.clone());
            CompletionMode::Asynchronous
        },
    ));
    let logger = RecordingLogger::new();
    let connector = SpiffeChannelSecurityConnector::builder(
        CountingEngine::default(),
        SpiffeCredentials::new(options),
        "backend.example.com",
    )
    .logger(Arc::new(logger.clone()))
    .create()
    .expect("connector");

    let (first_callback, first) = capture();
    connector.check_peer(h2_peer_with_cert(), first_callback);
    let (second_callback, second) = capture();
    connector.check_peer(
        Peer::new()
            .with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2")
            .with_property(X509_PEM_CERT_PROPERTY, "second-cert"),
        second_callback,
    );
    assert!(logger.contains("overlapping authorization check superseded a pending completion callback"));
    assert!(matches!(
        first.lock().as_slice(),
        [Err(SecurityError::AuthorizationIncomplete {
            status: StatusCode::Aborted,
            ..
        })]
    ));
    assert!(second.lock().is_empty());

    let request = parked.lock().take().expect("check scheduled");
    assert_eq!(
        request.peer_cert().as_deref(),
        Some("-----BEGIN CERTIFICATE-----")
    );
    request.set_result(StatusCode::Ok, true, None);
    request.complete();

    assert_eq!(first.lock().len(), 1, "被接管的回调只触发一次");
    assert!(matches!(second.lock().as_slice(), [Ok(_)]));

    // 完成后字段复位，下一次检查写入自己的输入。
    let (third_callback, third) = capture();
    connector.check_peer(
        Peer::new()
            .with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2")
            .with_property(X509_PEM_CERT_PROPERTY, "third-cert"),
        third_callback,
    );
    let request = parked.lock().take().expect("check scheduled");
    assert_eq!(request.peer_cert().as_deref(), Some("third-cert"));
    request.set_result(StatusCode::Ok, true, None);
    request.complete();
    assert_eq!(third.lock().len(), 1);
}

#[test]
fn call_host_and_comparison_follow_target_names() {
    let engine = CountingEngine::default();
    let credentials = SpiffeCredentials::new(static_options());
    let plain = SpiffeChannelSecurityConnector::builder(
        engine.clone(),
        Arc::clone(&credentials),
        "backend.example.com:443",
    )
    .create()
    .expect("connector");
    let same = SpiffeChannelSecurityConnector::builder(
        engine.clone(),
        Arc::clone(&credentials),
        "backend.example.com:8443",
    )
    .create()
    .expect("connector");
    let overridden = SpiffeChannelSecurityConnector::builder(
        engine,
        Arc::clone(&credentials),
        "backend.example.com",
    )
    .overridden_target_name("spiffe.test")
    .create()
    .expect("connector");

    assert_eq!(plain.cmp(&same), std::cmp::Ordering::Equal);
    assert_eq!(plain.cmp(&overridden), std::cmp::Ordering::Less);

    let mut context = AuthContext::new();
    context.add_property("x509_subject_alternative_name", "*.example.com");
    assert_eq!(plain.check_call_host("api.example.com:443", &context), Ok(()));
    let err = plain
        .check_call_host("api.other.org", &context)
        .expect_err("host not covered by the certificate");
    assert_eq!(err, SecurityError::CallHostMismatch);
    plain.cancel_check_call_host(err);
    assert_eq!(
        overridden.check_call_host("backend.example.com", &AuthContext::new()),
        Ok(())
    );
}

#[test]
fn server_connector_passes_request_type_and_checks_alpn() {
    let engine = CountingEngine::default();
    let options = static_options().with_cert_request_type(ClientCertRequestType::RequireAndVerify);
    let credentials = SpiffeServerCredentials::new(options);
    let connector = SpiffeServerSecurityConnector::create(engine.clone(), Arc::clone(&credentials))
        .expect("server connector");
    let factory = connector.handshaker_factory().expect("server factory");
    assert_eq!(
        factory.cert_request_type,
        ClientCertRequestType::RequireAndVerify
    );
    drop(factory);

    let mut handshakers: Vec<SecurityHandshaker<FakeHandshaker>> = Vec::new();
    connector.add_handshakers(&ConnectionArgs::new(), &mut handshakers);
    assert_eq!(handshakers[0].side(), HandshakeSide::Server);
    assert_eq!(engine.counters.server_builds.load(Ordering::SeqCst), 1);

    let (callback, outcomes) = capture();
    connector.check_peer(Peer::new().with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2"), callback);
    let (callback, rejected) = capture();
    connector.check_peer(Peer::new(), callback);
    assert!(outcomes.lock()[0].is_ok());
    assert_eq!(
        rejected.lock()[0].as_ref().map(|_| ()),
        Err(&SecurityError::Alpn(AlpnError::MissingSelectedProtocol))
    );

    let other = SpiffeServerSecurityConnector::create(engine, credentials).expect("connector");
    assert_eq!(connector.cmp(&other), std::cmp::Ordering::Equal);
}

#[test]
fn server_creation_without_material_is_logged() {
    let logger = RecordingLogger::new();
    let result = SpiffeServerSecurityConnector::create_with_logger(
        CountingEngine::default(),
        SpiffeServerCredentials::new(TlsCredentialsOptions::new()),
        Arc::new(logger.clone()),
    );
    assert_eq!(
        result.map(|_| ()),
        Err(SecurityError::KeyMaterials(ReloadError::Precondition))
    );
    assert!(logger.contains("Could not initialize server handshaker factory."));
}
