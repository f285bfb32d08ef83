fn notification_name(notification: &Notification) -> &str {
    match notification {
        Notification::LocalFileChanged { name, .. } | Notification::LocalFileDeleted { name } => {
            name
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64<F>(var: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_usize<F>(var: &F, name: &str, default: u64) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    usize::try_from(read_u64(var, name, default))
        .unwrap_or(usize::MAX)
        .min(tokio::sync::Semaphore::MAX_PERMITS)
}

fn read_bool<F>(var: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
