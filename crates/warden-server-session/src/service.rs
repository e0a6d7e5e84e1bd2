// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_server_config::WardenConfig;
use warden_server_db::{create_pool, run_migrations, DbError, Directory, FlagPolicy};

/// Open the configured database, migrate it, apply the flag policy and
/// register the configured vocabulary.
#[tracing::instrument(skip(config), fields(database = %config.database.url))]
pub async fn open_directory(config: &WardenConfig) -> Result<Directory, DbError> {
	let pool = create_pool(&config.database.url).await?;
	run_migrations(&pool).await?;

	let directory = Directory::new(pool).with_flag_policy(FlagPolicy {
		allow_auto_register: config.flags.allow_auto_register,
	});
	let registered = directory.bootstrap(&config.flags.vocabulary).await?;

	tracing::info!(registered, "directory ready");
	Ok(directory)
}
