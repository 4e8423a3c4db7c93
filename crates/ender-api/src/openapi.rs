//! OpenAPI document assembled from the handler annotations

use utoipa::OpenApi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ender-deploy API",
        description = "Control plane for containerised game servers",
        version = "0.4.0",
    ),
    paths(
        handlers::users::register,
        handlers::users::login,
        handlers::users::me,
        handlers::users::get_user,
        handlers::users::update_user,
        handlers::users::delete_user,
        handlers::users::change_password,
        handlers::servers::list_servers,
        handlers::servers::get_server,
        handlers::servers::create_server,
        handlers::servers::create_server_from_upload,
        handlers::servers::update_server,
        handlers::servers::delete_server,
        handlers::servers::perform_action,
        handlers::servers::send_command,
        handlers::servers::get_settings,
        handlers::servers::update_settings,
        handlers::servers::resource_history,
        handlers::servers::online_players,
        handlers::servers::manage_player,
        handlers::servers::list_files,
        handlers::servers::file_content,
        handlers::servers::update_file,
        handlers::servers::dashboard_stats,
        handlers::servers::system_resources,
        handlers::servers::available_port,
        handlers::backups::list_backups,
        handlers::backups::create_backup,
        handlers::backups::restore_backup,
        handlers::backups::delete_backup,
        handlers::schedules::list_schedules,
        handlers::schedules::create_schedule,
        handlers::schedules::update_schedule,
        handlers::schedules::delete_schedule,
        handlers::templates::list_templates,
        handlers::templates::get_template,
        handlers::templates::create_template,
        handlers::templates::update_template,
        handlers::templates::delete_template,
        handlers::events::recent_events,
    ),
    components(schemas(
        ender_store::Server,
        ender_store::ServerStatus,
        ender_store::PlayerInfo,
        ender_store::ResourceUsage,
        ender_store::ModpackInfo,
        ender_store::Template,
        ender_store::User,
        ender_store::Backup,
        ender_store::Event,
        ender_store::EventLevel,
        ender_store::Schedule,
        ender_store::ResourceDataPoint,
        ender_store::DashboardStats,
        ender_store::FileInfo,
        ender_store::OnlinePlayer,
        handlers::users::RegisterPayload,
        handlers::users::AuthPayload,
        handlers::users::LoginResponse,
        handlers::users::UpdateUserPayload,
        handlers::users::ChangePasswordPayload,
        handlers::servers::CreateServerPayload,
        handlers::servers::UpdateServerPayload,
        handlers::servers::ActionPayload,
        handlers::servers::CommandPayload,
        handlers::servers::UpdateFilePayload,
        handlers::servers::ManagePlayerPayload,
        handlers::servers::MessageResponse,
        handlers::backups::CreateBackupPayload,
        handlers::schedules::SchedulePayload,
        handlers::templates::TemplatePayload,
    )),
    tags(
        (name = "Servers", description = "Instance lifecycle and operations"),
        (name = "Backups", description = "Consistent snapshots"),
        (name = "Schedules", description = "Cron-triggered automation"),
        (name = "Templates", description = "Reusable blueprints"),
        (name = "Users", description = "Accounts and authentication"),
        (name = "Events", description = "Append-only event log"),
        (name = "Dashboard", description = "Aggregations"),
    )
)]
pub struct ApiDoc;
