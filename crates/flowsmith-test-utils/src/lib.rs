//! Fixtures shared by the flowsmith test suites.

use uuid::Uuid;

use flowsmith_core::secrets::MapSecretResolver;
use flowsmith_core::{
    Agent, AgentRole, Chat, Credential, EntityId, Flow, KeywordCriterion, Model, ProviderKind,
    SpeakerSelection, Termination, Tool,
};

/// Secret the fixtures' credential variable resolves to.
pub const TEST_API_KEY: &str = "sk-test-0123456789abcdef";

/// Environment variable the fixture models read their key from.
pub const TEST_API_KEY_VAR: &str = "FLOWSMITH_TEST_OPENAI_KEY";

/// A canonical id that is stable across runs.
pub fn fixture_id(n: u128) -> EntityId {
    EntityId::from(Uuid::from_u128(0x6f1c_2d3e_4b5a_4c6d_8e7f_0000_0000_0000 + n).to_string())
}

/// Resolver knowing [`TEST_API_KEY_VAR`].
pub fn secrets() -> MapSecretResolver {
    MapSecretResolver::new().with(TEST_API_KEY_VAR, TEST_API_KEY)
}

fn terminate_keyword() -> Termination {
    Termination::Keyword {
        keyword: "TERMINATE".into(),
        criterion: KeywordCriterion::Contains,
    }
}

/// Ids of the entities in [`two_agent_flow`].
pub struct TwoAgents {
    pub flow: Flow,
    pub model: EntityId,
    pub user: EntityId,
    pub assistant: EntityId,
    pub chat: EntityId,
}

/// User proxy `A` talks to assistant `B` backed by model `M1`; `B` stops on
/// `TERMINATE`.
pub fn two_agent_flow() -> TwoAgents {
    let mut flow = Flow::new("Two Agents");
    flow.id = fixture_id(1);
    flow.description = "A user proxy asks an assistant a question.".into();

    let mut model = Model::new("gpt-4o-mini", ProviderKind::OpenAi);
    model.id = fixture_id(10);
    model.credential = Some(Credential::Env {
        var: TEST_API_KEY_VAR.into(),
    });
    model.temperature = Some(0.5);

    let mut user = Agent::new("A", AgentRole::UserProxy);
    user.id = fixture_id(20);

    let mut assistant = Agent::new("B", AgentRole::Assistant)
        .with_model(&model.id)
        .with_system_message("You are helpful. Reply TERMINATE when done.")
        .with_termination(terminate_keyword());
    assistant.id = fixture_id(21);

    let mut chat = Chat::new(&user.id, &assistant.id)
        .with_message("What is the capital of France?")
        .with_max_turns(2);
    chat.id = fixture_id(30);
    chat.name = "A to B".into();

    let ids = (model.id.clone(), user.id.clone(), assistant.id.clone(), chat.id.clone());
    flow.models.push(model);
    flow.agents.push(user);
    flow.agents.push(assistant);
    flow.chats.push(chat);

    TwoAgents {
        flow,
        model: ids.0,
        user: ids.1,
        assistant: ids.2,
        chat: ids.3,
    }
}

/// [`two_agent_flow`] plus a tool whose body has a double quote and a
/// Windows path, registered on `B` and executed by `A`.
pub fn tool_flow() -> Flow {
    let mut fixture = two_agent_flow();
    let mut tool = Tool::new(
        "load_data",
        "def load_data() -> str:\n    \"\"\"Read the \"raw\" export.\"\"\"\n    with open(\"C:\\data\\x.csv\") as f:\n        return f.read()\n",
    );
    tool.id = fixture_id(40);
    tool.description = "Load the exported data".into();
    tool.requirements = vec!["pandas".into()];

    let assistant = fixture
        .flow
        .agents
        .iter_mut()
        .find(|a| a.id == fixture.assistant);
    if let Some(assistant) = assistant {
        assistant.tools.push(flowsmith_core::ToolBinding {
            tool: tool.id.clone(),
            executor: Some(fixture.user.clone()),
        });
    }
    fixture.flow.tools.push(tool);
    fixture.flow
}

/// A user proxy hands off to a round-robin group of two assistants.
pub fn group_flow() -> Flow {
    let mut flow = Flow::new("Writers Room");
    flow.id = fixture_id(100);

    let mut model = Model::new("gpt-4o", ProviderKind::OpenAi);
    model.id = fixture_id(110);
    model.credential = Some(Credential::Inline {
        value: "sk-inline-secret-value".into(),
    });

    let mut user = Agent::new("user", AgentRole::UserProxy);
    user.id = fixture_id(120);
    let mut writer = Agent::new("writer", AgentRole::Assistant).with_model(&model.id);
    writer.id = fixture_id(121);
    let mut critic = Agent::new("critic", AgentRole::Assistant)
        .with_model(&model.id)
        .with_termination(terminate_keyword());
    critic.id = fixture_id(122);
    let mut manager = Agent::new(
        "manager",
        AgentRole::GroupManager {
            max_round: Some(6),
            speaker_selection: SpeakerSelection::RoundRobin,
        },
    );
    manager.id = fixture_id(123);

    let mut kickoff = Chat::new(&user.id, &manager.id)
        .with_message("Write a haiku about compilers.")
        .with_sequence(0);
    kickoff.id = fixture_id(130);
    let mut draft = Chat::new(&writer.id, &critic.id).in_group(&manager.id);
    draft.id = fixture_id(131);
    let mut review = Chat::new(&critic.id, &writer.id).in_group(&manager.id);
    review.id = fixture_id(132);

    flow.models.push(model);
    flow.agents.extend([manager, user, writer, critic]);
    flow.chats.extend([kickoff, draft, review]);
    flow
}
