pub mod agent;
pub mod context;
pub mod cron;
pub mod kubetask_config;
pub mod task;
pub mod task_template;
pub mod webhook_trigger;
pub mod workflow;

pub use agent::{Agent, AgentQuota, AgentSpec, AgentStatus, Credential, TaskStartRecord};
pub use context::{Context as ContextResource, ContextSource, ContextSpec, GitSource};
pub use cron::{ActiveRef, ConcurrencyPolicy, CronStatus, CronTask, CronTaskSpec, CronWorkflow, CronWorkflowSpec};
pub use kubetask_config::{KubeTaskConfig, KubeTaskConfigSpec};
pub use task::{
    AgentRef, ContextItem, ContextRef, HumanInTheLoop, Task, TaskCondition, TaskPhase, TaskSpec,
    TaskStatus,
};
pub use task_template::{TaskTemplate, TaskTemplateSpec};
pub use webhook_trigger::{
    ActiveResource, HmacAlgorithm, MatchPolicy, TriggerConcurrency, WebhookRule, WebhookTrigger,
    WebhookTriggerSpec, WebhookTriggerStatus,
};
pub use workflow::{
    StageStatus, Workflow, WorkflowRun, WorkflowRunPhase, WorkflowRunSpec, WorkflowRunStatus,
    WorkflowSpec, WorkflowStage, WorkflowTask,
};
