use super::*;

#[test]
fn conversation_wraps_bare_prompt() {
    let req = Request {
        id: "r1".into(),
        prompt: "hello".into(),
        model: None,
        provider: None,
        temperature: 0.7,
        max_tokens: 1024,
        stream: false,
        tools: vec![],
        messages: vec![],
        context: RequestContext::default(),
        timeout: Duration::from_secs(30),
        priority: Priority::default(),
    };
    let conv = req.conversation();
    assert_eq!(conv.len(), 1);
    assert_eq!(conv[0].role, Role::User);
    assert_eq!(conv[0].content, "hello");
}

#[test]
fn conversation_prefers_explicit_messages() {
    let req = Request {
        id: "r2".into(),
        prompt: String::new(),
        model: None,
        provider: None,
        temperature: 0.7,
        max_tokens: 1024,
        stream: false,
        tools: vec![],
        messages: vec![Message::system("be terse"), Message::user("hi")],
        context: RequestContext::default(),
        timeout: Duration::from_secs(30),
        priority: Priority::Medium,
    };
    assert_eq!(req.conversation().len(), 2);
}

#[test]
fn tool_call_arguments_parse_leniently() {
    let call = ToolCall {
        id: "t_1".into(),
        name: "read_file".into(),
        arguments: r#"{"path": "src/main.rs"}"#.into(),
    };
    assert_eq!(call.parsed_arguments()["path"], "src/main.rs");

    let broken = ToolCall {
        id: "t_2".into(),
        name: "read_file".into(),
        arguments: "not json".into(),
    };
    assert!(broken.parsed_arguments().as_object().unwrap().is_empty());
}

#[test]
fn usage_totals_are_derived() {
    let usage = Usage::new(120, 30);
    assert_eq!(usage.total_tokens, 150);
}

#[test]
fn request_round_trips_through_json() {
    let req = Request {
        id: "r3".into(),
        prompt: "x".into(),
        model: Some("qwen2.5-coder".into()),
        provider: Some("lm-studio".into()),
        temperature: 0.2,
        max_tokens: 512,
        stream: true,
        tools: vec![],
        messages: vec![],
        context: RequestContext::default(),
        timeout: Duration::from_secs(15),
        priority: Priority::High,
    };
    let json = serde_json::to_string(&req).unwrap();
    let back: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(back.timeout, Duration::from_secs(15));
    assert_eq!(back.priority, Priority::High);
}
