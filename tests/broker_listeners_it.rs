// self
use appcheck_broker::{
	_preludet::*,
	broker::{ActivateOptions, ListenerKind, TokenListener},
	error::Error,
	store::PersistentCache,
};

fn pause() -> std::time::Duration {
	std::time::Duration::from_millis(100)
}

fn recording_listener(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> TokenListener {
	let log = log.clone();
	let tag = tag.to_owned();

	Arc::new(move |result| {
		log.lock().push(format!("{tag}:{}", result.token));
	})
}

#[tokio::test]
async fn successful_exchange_notifies_listeners_in_registration_order() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-fanout");
	let provider = Arc::new(MockProvider::default());
	let log = Arc::new(Mutex::new(Vec::new()));

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(&app, ListenerKind::External, recording_listener(&log, "a"), None)
		.expect("Application is activated.");
	broker
		.add_token_listener(&app, ListenerKind::External, recording_listener(&log, "b"), None)
		.expect("Application is activated.");

	broker.get_token(&app, false).await.expect("Application is activated.");

	assert_eq!(*log.lock(), ["a:tok-1", "b:tok-1"]);
}

#[tokio::test]
async fn joined_callers_do_not_duplicate_notifications() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-fanout-once");
	let provider = Arc::new(MockProvider::default());
	let log = Arc::new(Mutex::new(Vec::new()));

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(&app, ListenerKind::External, recording_listener(&log, "l"), None)
		.expect("Application is activated.");

	// Both cache hits and fresh exchanges notify at most once per exchange.
	broker.get_token(&app, false).await.expect("Application is activated.");
	broker.get_token(&app, false).await.expect("Application is activated.");

	assert_eq!(*log.lock(), ["l:tok-1"]);
}

#[tokio::test]
async fn a_new_listener_receives_the_valid_cached_token() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-replay");
	let provider = Arc::new(MockProvider::default());
	let log = Arc::new(Mutex::new(Vec::new()));

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker.get_token(&app, false).await.expect("Application is activated.");

	broker
		.add_token_listener(&app, ListenerKind::External, recording_listener(&log, "late"), None)
		.expect("Application is activated.");
	tokio::time::sleep(pause()).await;

	assert_eq!(*log.lock(), ["late:tok-1"]);
}

#[tokio::test]
async fn failures_reach_the_error_channel_of_external_listeners() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-error-channel");
	let provider = Arc::new(MockProvider::default());
	let tokens = Arc::new(Mutex::new(Vec::new()));
	let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
	let on_error = {
		let errors = errors.clone();

		Arc::new(move |error: &Error| {
			errors.lock().push(error.to_string());
		})
	};

	provider.push(Err(Error::attestation("Scripted failure.")));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(
			&app,
			ListenerKind::External,
			recording_listener(&tokens, "ext"),
			Some(on_error),
		)
		.expect("Application is activated.");

	let result = broker.get_token(&app, false).await.expect("Failures never surface as Err.");

	assert!(!result.is_ok());
	assert!(tokens.lock().is_empty());
	assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn internal_listeners_receive_degraded_results_instead_of_errors() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-internal");
	let provider = Arc::new(MockProvider::default());
	let log = Arc::new(Mutex::new(Vec::new()));

	provider.push(Err(Error::attestation("Scripted failure.")));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(&app, ListenerKind::Internal, recording_listener(&log, "int"), None)
		.expect("Application is activated.");

	broker.get_token(&app, false).await.expect("Failures never surface as Err.");

	let log = log.lock();

	assert_eq!(log.len(), 1);
	assert!(log[0].starts_with("int:"));
}

#[tokio::test]
async fn a_panicking_listener_does_not_starve_the_rest() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-panic");
	let provider = Arc::new(MockProvider::default());
	let log = Arc::new(Mutex::new(Vec::new()));
	let panicking: TokenListener = Arc::new(|_| panic!("Listener bug."));

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(&app, ListenerKind::External, panicking, None)
		.expect("Application is activated.");
	broker
		.add_token_listener(&app, ListenerKind::External, recording_listener(&log, "ok"), None)
		.expect("Application is activated.");

	broker.get_token(&app, false).await.expect("Application is activated.");

	assert_eq!(*log.lock(), ["ok:tok-1"]);
}

#[tokio::test]
async fn removing_the_last_listener_stops_the_refresher() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-remove");
	let provider = Arc::new(MockProvider::default());
	let listener: TokenListener = Arc::new(|_| {});

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider))
		.expect("Activation should succeed.");
	broker
		.add_token_listener(&app, ListenerKind::External, listener.clone(), None)
		.expect("Application is activated.");
	tokio::time::sleep(pause()).await;

	let state = broker.store().get(&app).expect("Activated application should have state.");

	assert_eq!(state.observer_count(), 1);
	assert!(!state.is_refresher_running());

	broker.set_token_auto_refresh_enabled(&app, true).expect("Application is activated.");
	assert!(state.is_refresher_running());

	broker.remove_token_listener(&app, &listener).expect("Application is activated.");

	assert_eq!(state.observer_count(), 0);
	assert!(!state.is_refresher_running());
}

#[tokio::test]
async fn auto_refresh_prefetches_a_token_without_callers() {
	let (broker, cache, _) = build_test_broker();
	let app = test_app("app-prefetch");
	let provider = Arc::new(MockProvider::default());

	provider.push(Ok(test_token("tok-prefetched", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider.clone()).auto_refresh(true))
		.expect("Activation should succeed.");
	tokio::time::sleep(pause()).await;

	assert_eq!(provider.calls(), 1);

	let state = broker.store().get(&app).expect("Activated application should have state.");

	assert_eq!(
		state.cached_token().expect("Prefetch should have stored a token.").token(),
		"tok-prefetched"
	);
	assert!(
		cache
			.read(&app)
			.await
			.expect("In-memory cache reads are infallible.")
			.is_some()
	);
	assert!(state.is_refresher_running());
}

#[tokio::test]
async fn toggling_auto_refresh_stops_and_restarts_the_refresher() {
	let (broker, _, _) = build_test_broker();
	let app = test_app("app-toggle");
	let provider = Arc::new(MockProvider::default());

	provider.push(Ok(test_token("tok-1", Duration::hours(1))));
	broker
		.activate(app.clone(), ActivateOptions::new(provider).auto_refresh(true))
		.expect("Activation should succeed.");
	tokio::time::sleep(pause()).await;

	let state = broker.store().get(&app).expect("Activated application should have state.");

	assert!(state.is_refresher_running());

	broker.set_token_auto_refresh_enabled(&app, false).expect("Application is activated.");
	assert!(!state.is_refresher_running());
	assert!(!state.is_auto_refresh_enabled());

	broker.set_token_auto_refresh_enabled(&app, true).expect("Application is activated.");
	assert!(state.is_refresher_running());
}
