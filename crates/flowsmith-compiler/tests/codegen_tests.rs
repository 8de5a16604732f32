use flowsmith_compiler::{compile, compile_to, generate, plan, validate};
use flowsmith_core::config::CompilerConfig;
use flowsmith_core::error::{GenerationError, ViolationKind};
use flowsmith_core::secrets::{MapSecretResolver, NoSecrets};
use flowsmith_core::{Chat, ChatMessages, Credential, Flow, FlowsmithError, TargetForm, Tool};
use flowsmith_test_utils::{fixture_id, group_flow, secrets, tool_flow, two_agent_flow, TEST_API_KEY};

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("{:?} not found in:\n{}", needle, haystack))
}

fn notebook_code(contents: &str) -> String {
    let nb: serde_json::Value = serde_json::from_str(contents).unwrap();
    nb["cells"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["cell_type"] == "code")
        .map(|c| {
            c["source"]
                .as_array()
                .unwrap()
                .iter()
                .map(|l| l.as_str().unwrap())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_two_agent_script_orders_model_then_agents_then_chat() {
    let fixture = two_agent_flow();
    let config = CompilerConfig::default();
    let artifact = compile(&fixture.flow, TargetForm::Script, &secrets(), &config).unwrap();
    let src = &artifact.contents;

    let model = position(src, "gpt_4o_mini_llm_config = {");
    let b = position(src, "b = AssistantAgent(");
    let a = position(src, "a = UserProxyAgent(");
    let chat = position(src, "a.initiate_chat(");
    assert!(model < b && b < a && a < chat);

    assert!(src.contains("\"TERMINATE\""));
    assert!(src.contains("from autogen import AssistantAgent, UserProxyAgent"));
    assert!(src.contains("from two_agents_api_keys import get_two_agents_model_api_key"));
    assert!(src.contains(&format!("get_two_agents_model_api_key(\"{}\")", fixture.model)));
    assert!(src.contains("max_turns=2,"));
    assert!(src.contains("if __name__ == \"__main__\":"));

    assert_eq!(artifact.file_name, "two_agents.py");
    assert_eq!(artifact.secrets_file_name, "two_agents_api_keys.py");
    assert_eq!(artifact.requirements, vec!["ag2[openai]"]);
    assert_eq!(artifact.credential_env, vec!["FLOWSMITH_TEST_OPENAI_KEY"]);
}

#[test]
fn test_generation_is_deterministic() {
    let fixture = two_agent_flow();
    let config = CompilerConfig::default();
    for form in [TargetForm::Script, TargetForm::Notebook] {
        let first = compile(&fixture.flow, form, &secrets(), &config).unwrap();
        let second = compile(&fixture.flow, form, &secrets(), &config).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_credentials_only_reach_the_secrets_file() {
    let fixture = two_agent_flow();
    let config = CompilerConfig::default();
    for form in [TargetForm::Script, TargetForm::Notebook] {
        let artifact = compile(&fixture.flow, form, &secrets(), &config).unwrap();
        assert!(!artifact.contents.contains(TEST_API_KEY));
        assert!(artifact.secrets.contains(TEST_API_KEY));
    }

    let group = group_flow();
    let artifact = compile(&group, TargetForm::Script, &NoSecrets, &config).unwrap();
    assert!(!artifact.contents.contains("sk-inline-secret-value"));
    assert!(artifact.secrets.contains("\"sk-inline-secret-value\""));
}

#[test]
fn test_unresolved_env_credential_is_looked_up_at_run_time() {
    let fixture = two_agent_flow();
    let artifact = compile(
        &fixture.flow,
        TargetForm::Script,
        &MapSecretResolver::new(),
        &CompilerConfig::default(),
    )
    .unwrap();
    assert!(artifact
        .secrets
        .contains("os.environ.get(\"FLOWSMITH_TEST_OPENAI_KEY\", \"\")"));
}

#[test]
fn test_secret_leaking_into_source_is_rejected() {
    let mut fixture = two_agent_flow();
    fixture.flow.agents[1].system_message = Some(format!("your key is {}", TEST_API_KEY));
    let err = compile(
        &fixture.flow,
        TargetForm::Script,
        &secrets(),
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        FlowsmithError::Generation(GenerationError::SecretLeak { entity }) if entity == fixture.model
    ));
}

#[test]
fn test_script_and_notebook_construct_in_the_same_order() {
    let flow = group_flow();
    let config = CompilerConfig::default();
    let script = compile(&flow, TargetForm::Script, &NoSecrets, &config).unwrap();
    let notebook = compile(&flow, TargetForm::Notebook, &NoSecrets, &config).unwrap();
    let code = notebook_code(&notebook.contents);

    let markers = [
        "gpt_4o_llm_config = {",
        "writer = AssistantAgent(",
        "critic = AssistantAgent(",
        "user = UserProxyAgent(",
        "manager_group_chat = GroupChat(",
        "manager = GroupChatManager(",
        "user.initiate_chat(",
    ];
    for src in [&script.contents, &code] {
        let positions: Vec<usize> = markers.iter().map(|m| position(src, m)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted, "{}", src);
    }
}

#[test]
fn test_group_chat_lists_members_and_transitions() {
    let flow = group_flow();
    let artifact = compile(&flow, TargetForm::Script, &NoSecrets, &CompilerConfig::default()).unwrap();
    let src = &artifact.contents;
    assert!(src.contains("agents=[writer, critic],"));
    assert!(src.contains("max_round=6,"));
    assert!(src.contains("speaker_selection_method=\"round_robin\","));
    assert!(src.contains("writer: [critic],"));
    assert!(src.contains("critic: [writer],"));
    assert!(src.contains("groupchat=manager_group_chat,"));
}

#[test]
fn test_notebook_cells_follow_the_section_layout() {
    let fixture = two_agent_flow();
    let artifact = compile(
        &fixture.flow,
        TargetForm::Notebook,
        &secrets(),
        &CompilerConfig::default(),
    )
    .unwrap();
    assert_eq!(artifact.file_name, "two_agents.ipynb");

    let nb: serde_json::Value = serde_json::from_str(&artifact.contents).unwrap();
    assert_eq!(nb["nbformat"], 4);
    assert_eq!(nb["nbformat_minor"], 4);
    let cells = nb["cells"].as_array().unwrap();
    // title, pip, imports, models, B, A, chat
    assert_eq!(cells.len(), 7);
    assert_eq!(cells[0]["cell_type"], "markdown");
    assert_eq!(cells[1]["source"][0], "%pip install -q \"ag2[openai]\"");
    assert_eq!(
        cells[2]["source"],
        serde_json::json!([
            "from two_agents_api_keys import get_two_agents_model_api_key\n",
            "from autogen import AssistantAgent, UserProxyAgent"
        ])
    );
    assert!(cells[4]["source"][0].as_str().unwrap().starts_with("b = AssistantAgent("));
    assert!(cells[5]["source"][0].as_str().unwrap().starts_with("a = UserProxyAgent("));
    assert_eq!(cells[6]["source"][0], "results = []\n");

    assert!(artifact.requirements.contains(&"nbclient".to_string()));
    assert!(artifact.requirements.contains(&"ipykernel".to_string()));
}

#[test]
fn test_tool_with_quote_and_windows_path_compiles() {
    let flow = tool_flow();
    let artifact = compile(&flow, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    let src = &artifact.contents;
    assert!(src.contains("\"\"\"Read the \"raw\" export.\"\"\""));
    assert!(src.contains("open(\"C:/data/x.csv\")"));
    assert!(!src.contains("C:\\data"));

    let register = position(src, "register_function(");
    assert!(register < position(src, "def main():"));
    assert!(src.contains("    caller=b,\n    executor=a,\n    name=\"load_data\","));
    assert!(src.contains("from autogen import register_function, AssistantAgent, UserProxyAgent"));
    assert_eq!(artifact.requirements, vec!["ag2[openai]", "pandas"]);
}

#[test]
fn test_nul_in_message_is_an_embedding_error() {
    let mut fixture = two_agent_flow();
    fixture.flow.chats[0] = Chat::new(&fixture.user, &fixture.assistant).with_message("bad\0byte");
    fixture.flow.chats[0].id = fixture.chat.clone();
    let err = compile(&fixture.flow, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap_err();
    match err {
        FlowsmithError::Generation(GenerationError::Embedding { entity, field, .. }) => {
            assert_eq!(entity, fixture.chat);
            assert_eq!(field, "message");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_non_finite_temperature_is_an_embedding_error() {
    let mut fixture = two_agent_flow();
    fixture.flow.models[0].temperature = Some(f32::NAN);
    let plan = plan(&fixture.flow).unwrap();
    let err = generate(
        &fixture.flow,
        &plan,
        TargetForm::Script,
        &secrets(),
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GenerationError::Embedding { field, .. } if field == "temperature"));
}

#[test]
fn test_unsupported_target_is_rejected_before_generation() {
    let err = "docx".parse::<TargetForm>().unwrap_err();
    assert_eq!(err, GenerationError::UnsupportedTarget("docx".into()));
}

#[test]
fn test_cycle_without_termination_fails_validation() {
    let mut fixture = two_agent_flow();
    fixture.flow.agents[1].termination = Default::default();
    fixture.flow.chats[0].max_turns = None;
    fixture.flow.chats[0].sequence = Some(0);
    let mut back = Chat::new(&fixture.assistant, &fixture.user).with_message("and back");
    back.sequence = Some(1);
    fixture.flow.chats.push(back);

    let report = validate(&fixture.flow);
    assert_eq!(report.of_kind(ViolationKind::UnterminatedCycle).count(), 1);
    let err = compile(&fixture.flow, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, FlowsmithError::Validation(_)));
}

#[test]
fn test_cache_seed_is_passed_to_model_configs() {
    let fixture = two_agent_flow();
    let config = CompilerConfig {
        cache_seed: Some(42),
        ..CompilerConfig::default()
    };
    let artifact = compile(&fixture.flow, TargetForm::Script, &secrets(), &config).unwrap();
    assert!(artifact.contents.contains("\"cache_seed\": 42,"));
    assert!(artifact.contents.contains("\"temperature\": 0.5,"));
}

#[test]
fn test_compile_to_writes_the_pair() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = two_agent_flow();
    let written = compile_to(
        &fixture.flow,
        TargetForm::Script,
        &secrets(),
        &CompilerConfig::default(),
        dir.path(),
    )
    .unwrap();
    assert!(written.path.ends_with("two_agents.py"));
    let secrets_file = std::fs::read_to_string(&written.secrets_path).unwrap();
    assert!(secrets_file.contains(TEST_API_KEY));
    assert_eq!(written.credential_env, vec!["FLOWSMITH_TEST_OPENAI_KEY"]);
}

#[test]
fn test_inline_credential_in_secrets_even_without_resolver_map() {
    let mut fixture = two_agent_flow();
    fixture.flow.models[0].credential = Some(Credential::Inline {
        value: "sk-live-inline".into(),
    });
    let artifact = compile(
        &fixture.flow,
        TargetForm::Script,
        &NoSecrets,
        &CompilerConfig::default(),
    )
    .unwrap();
    assert!(artifact.secrets.contains("sk-live-inline"));
    assert!(!artifact.contents.contains("sk-live-inline"));
    assert!(artifact.credential_env.is_empty());
}

const NORMALIZE_SOURCE: &str = "def normalize(p: str) -> str:\n    \"\"\"Forward slashes and no trailing newline.\"\"\"\n    return p.replace(\"\\\\\", \"/\").rstrip(\"\\n\") + '\\t'\n";

/// Two-agent flow with a second, carried-over chat and a tool that reads a
/// secret and uses escape sequences.
fn extended_flow() -> Flow {
    let mut fixture = two_agent_flow();
    fixture.flow.chats[0].sequence = Some(0);

    let mut follow_up = Chat::new(&fixture.user, &fixture.assistant)
        .with_message("Now name its largest museum.")
        .with_sequence(1)
        .with_max_turns(2)
        .with_carryover();
    follow_up.id = fixture_id(31);
    fixture.flow.chats.push(follow_up);

    let mut tool = Tool::new("normalize", NORMALIZE_SOURCE)
        .with_secret("MUSEUM_API_TOKEN", Credential::Env { var: "MY_MUSEUM_TOKEN".into() });
    tool.id = fixture_id(41);
    fixture.flow.tools.push(tool);
    fixture.flow
}

#[test]
fn test_tool_escape_sequences_are_kept_verbatim() {
    let artifact = compile(&extended_flow(), TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    assert!(artifact
        .contents
        .contains("    return p.replace(\"\\\\\", \"/\").rstrip(\"\\n\") + '\\t'\n"));
    assert!(!artifact.contents.contains("\"//\""));
}

#[test]
fn test_tool_secrets_are_exported_before_tools() {
    let artifact = compile(&extended_flow(), TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    let src = &artifact.contents;
    assert!(src.contains("from two_agents_api_keys import get_two_agents_model_api_key, set_two_agents_tool_secrets"));
    assert!(position(src, "set_two_agents_tool_secrets()\n") < position(src, "def normalize("));
    assert!(!src.contains("MY_MUSEUM_TOKEN"));

    assert!(artifact
        .secrets
        .contains("\"MUSEUM_API_TOKEN\": os.environ.get(\"MY_MUSEUM_TOKEN\", \"\"),"));
    assert!(artifact.secrets.contains("def set_two_agents_tool_secrets():"));
    assert_eq!(
        artifact.credential_env,
        vec!["FLOWSMITH_TEST_OPENAI_KEY", "MY_MUSEUM_TOKEN"]
    );
}

#[test]
fn test_resolved_tool_secret_stays_in_the_secrets_file() {
    let resolver = secrets().with("MY_MUSEUM_TOKEN", "museum-token-987654");
    let artifact = compile(&extended_flow(), TargetForm::Script, &resolver, &CompilerConfig::default()).unwrap();
    assert!(artifact.secrets.contains("\"museum-token-987654\""));
    assert!(!artifact.contents.contains("museum-token-987654"));
}

#[test]
fn test_carryover_appends_latest_summary() {
    let flow = extended_flow();
    let artifact = compile(&flow, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    let src = &artifact.contents;

    let helper = position(src, "    def last_carryover(results):");
    let setup = position(src, "    results = []");
    assert!(helper < setup);
    assert!(src.contains("message=\"Now name its largest museum.\" + last_carryover(results),"));
    assert!(src.contains("message=\"What is the capital of France?\",\n"));

    let mut generated = flow.clone();
    generated.chats[1].messages = ChatMessages::Generator {
        function: "next_question".into(),
    };
    let mut source = Tool::new("next_question", "def next_question(sender, recipient, context):\n    return \"More?\" + context.get(\"carryover\", \"\")\n");
    source.id = fixture_id(42);
    generated.tools.push(source);
    let artifact = compile(&generated, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    assert!(artifact.contents.contains("message=next_question,\n"));
    assert!(artifact.contents.contains("carryover=last_carryover(results),\n"));
}

#[test]
fn test_carryover_helper_only_when_used() {
    let fixture = two_agent_flow();
    let artifact = compile(&fixture.flow, TargetForm::Script, &secrets(), &CompilerConfig::default()).unwrap();
    assert!(!artifact.contents.contains("last_carryover"));
}

#[test]
fn test_short_resolved_secret_is_not_a_leak() {
    let mut fixture = two_agent_flow();
    fixture.flow.chats[0] = Chat::new(&fixture.user, &fixture.assistant).with_message("test the answer");
    let resolver = MapSecretResolver::new().with("FLOWSMITH_TEST_OPENAI_KEY", "test");
    let artifact = compile(&fixture.flow, TargetForm::Script, &resolver, &CompilerConfig::default()).unwrap();
    assert!(artifact.contents.contains("test the answer"));
    assert!(artifact.secrets.contains("\"test\""));
}

#[test]
fn test_generated_script_is_valid_python() {
    let available = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success());
    if !available {
        eprintln!("python3 not found, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    for (i, flow) in [extended_flow(), tool_flow(), group_flow()].iter().enumerate() {
        let out = dir.path().join(i.to_string());
        let written = compile_to(flow, TargetForm::Script, &secrets(), &CompilerConfig::default(), &out).unwrap();
        for path in [&written.path, &written.secrets_path] {
            let status = std::process::Command::new("python3")
                .args(["-m", "py_compile"])
                .arg(path)
                .status()
                .unwrap();
            assert!(status.success(), "{} does not compile", path.display());
        }
    }
}
