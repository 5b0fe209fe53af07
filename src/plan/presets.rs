//! Built-in deploy plan used when no plan file is found.

/// Shard destinations on the shared build and play hosts.
pub const STANDARD_PLAN: &str = r#"
[remotes.basicssh]
host = "admin-eu.playmonumenta.com"
port = 8822
user = "epic"

[remotes.adminssh]
host = "admin-eu.playmonumenta.com"
port = 9922
user = "epic"

[destinations.dev1]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/dev1_shard_plugins"]
lock = { domain = "build", shard = "dev1", minutes = 30 }

[destinations.dev2]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/dev2_shard_plugins"]
lock = { domain = "build", shard = "dev2", minutes = 30 }

[destinations.dev3]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/dev3_shard_plugins"]
lock = { domain = "build", shard = "dev3", minutes = 30 }

[destinations.dev4]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/dev4_shard_plugins"]
lock = { domain = "build", shard = "dev4", minutes = 30 }

[destinations.futurama]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/futurama_shard_plugins"]
lock = { domain = "build", shard = "futurama", minutes = 30 }

[destinations.mob]
remote = "basicssh"
mode = "overwrite"
paths = ["/home/epic/mob_shard_plugins"]
lock = { domain = "build", shard = "mob", minutes = 30 }

[destinations.stage]
remote = "basicssh"
mode = "symlink-swap"
paths = [
    "/home/epic/stage/m17/server_config/plugins",
    "/home/epic/stage/m18/server_config/plugins",
]
lock = { domain = "stage", shard = "*", minutes = 30 }

[destinations.volt]
remote = "basicssh"
mode = "symlink-swap"
paths = [
    "/home/epic/volt/m17/server_config/plugins",
    "/home/epic/volt/m18/server_config/plugins",
]
lock = { domain = "volt", shard = "*", minutes = 30 }

[destinations.m119]
remote = "adminssh"
mode = "symlink-swap"
paths = ["/home/epic/project_epic/m119/plugins"]
lock = { domain = "build", shard = "m119", minutes = 30 }

[destinations.build]
remote = "adminssh"
mode = "symlink-swap"
paths = ["/home/epic/project_epic/server_config/plugins"]
lock = { domain = "build", shard = "*", check_only = true }

[destinations.play]
remote = "adminssh"
mode = "symlink-swap"
paths = [
    "/home/epic/play/m17/server_config/plugins",
    "/home/epic/play/m18/server_config/plugins",
]
lock = { domain = "play", shard = "*", check_only = true }
"#;
