use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{Subtask, Task, TaskFields};

#[derive(Serialize)]
pub struct TaskDetail<'a> {
    #[serde(flatten)]
    pub task: &'a Task,
    pub subtasks: Vec<&'a Subtask>,
}

/// Pair every task with the subtasks that point at it.
pub fn task_details<'a>(tasks: &'a [Task], subtasks: &'a [Subtask]) -> Vec<TaskDetail<'a>> {
    let by_parent = group_by_parent(subtasks);
    tasks
        .iter()
        .map(|task| TaskDetail {
            task,
            subtasks: by_parent.get(&task.id).cloned().unwrap_or_default(),
        })
        .collect()
}

fn group_by_parent(subtasks: &[Subtask]) -> HashMap<i64, Vec<&Subtask>> {
    let mut map: HashMap<i64, Vec<&Subtask>> = HashMap::new();
    for sub in subtasks {
        map.entry(sub.parent_task_id).or_default().push(sub);
    }
    map
}

fn describe(id: i64, fields: &TaskFields) -> String {
    let mut line = format!(
        "{} #{} {}",
        fields.icon(),
        id,
        fields.title.as_deref().unwrap_or("(untitled)")
    );
    if let Some(due) = fields.due_date {
        line.push_str(&format!("  due {due}"));
    }
    if let Some(category) = fields.category.as_deref().filter(|c| !c.is_empty()) {
        line.push_str(&format!("  [{category}]"));
    }
    line
}

pub fn format_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&describe(task.id, &task.fields));
        out.push('\n');
    }
    out
}

/// Tasks with their subtasks drawn underneath. Subtasks whose parent is not
/// in `tasks` are listed last.
pub fn format_task_tree(tasks: &[Task], subtasks: &[Subtask]) -> String {
    let by_parent = group_by_parent(subtasks);
    let mut out = String::new();

    for task in tasks {
        out.push_str(&describe(task.id, &task.fields));
        out.push('\n');
        let children = by_parent.get(&task.id).cloned().unwrap_or_default();
        for (i, child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 {
                "└── "
            } else {
                "├── "
            };
            out.push_str(connector);
            out.push_str(&describe(child.id, &child.fields));
            out.push('\n');
        }
    }

    let task_ids: HashSet<i64> = tasks.iter().map(|t| t.id).collect();
    let orphans: Vec<&Subtask> = subtasks
        .iter()
        .filter(|s| !task_ids.contains(&s.parent_task_id))
        .collect();
    if !orphans.is_empty() {
        out.push_str("Detached subtasks:\n");
        for sub in orphans {
            out.push_str(&format!(
                "  {} (parent #{})\n",
                describe(sub.id, &sub.fields),
                sub.parent_task_id
            ));
        }
    }
    out
}
