use game::TaskType;
use tracing::info;

use crate::{error::StoreResult, models::NewTask, store::Store};

struct TaskTemplate {
    key: &'static str,
    name: &'static str,
    description: &'static str,
    reward: i64,
    kind: TaskType,
}

const DEFAULT_TASKS: [TaskTemplate; 8] = [
    TaskTemplate {
        key: "first_click",
        name: "First Click",
        description: "Make your first click in the clicker game",
        reward: 5,
        kind: TaskType::OneTime,
    },
    TaskTemplate {
        key: "click_10",
        name: "10 Clicks",
        description: "Click 10 times in the clicker game",
        reward: 10,
        kind: TaskType::OneTime,
    },
    TaskTemplate {
        key: "click_100",
        name: "100 Clicks",
        description: "Click 100 times in the clicker game",
        reward: 50,
        kind: TaskType::OneTime,
    },
    TaskTemplate {
        key: "daily_click",
        name: "Daily Clicks",
        description: "Click at least 10 times in the clicker game today",
        reward: 15,
        kind: TaskType::Daily,
    },
    TaskTemplate {
        key: "first_bet",
        name: "First Bet",
        description: "Place your first bet in the SOL betting game",
        reward: 10,
        kind: TaskType::OneTime,
    },
    TaskTemplate {
        key: "first_bet_win",
        name: "Winning Bet",
        description: "Win a round of the SOL betting game",
        reward: 25,
        kind: TaskType::OneTime,
    },
    TaskTemplate {
        key: "daily_bet",
        name: "Daily Bet",
        description: "Place at least one bet today",
        reward: 20,
        kind: TaskType::Daily,
    },
    TaskTemplate {
        key: "invite_friend",
        name: "Invite a Friend",
        description: "Invite one friend to the game",
        reward: 50,
        kind: TaskType::Social,
    },
];

pub fn default_tasks() -> Vec<NewTask> {
    DEFAULT_TASKS
        .iter()
        .map(|template| NewTask {
            name: template.name.to_string(),
            description: template.description.to_string(),
            score_reward: template.reward,
            task_type: template.kind,
            task_key: template.key.to_string(),
        })
        .collect()
}

/// Creates every default task whose key is not in the store yet. Returns how
/// many were created; running it again is a no-op.
pub async fn seed_tasks(store: &dyn Store) -> StoreResult<usize> {
    let mut created = 0;
    for task in default_tasks() {
        if store.find_task_by_key(&task.task_key).await?.is_some() {
            continue;
        }
        info!("Seeding task {}", task.task_key);
        store.create_task(task).await?;
        created += 1;
    }
    Ok(created)
}
