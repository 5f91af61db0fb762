//! Command-line arguments.

use domain::models::CreatorType;

#[derive(clap::Parser)]
#[command(
    author,
    version,
    about = "Invitation code administration for the registration backend"
)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Ensure the configured review bypass / reject codes exist and are unused
    #[default]
    SeedReviewCodes,
    /// Generate random invitation codes
    Generate {
        /// Number of codes to generate (1-100)
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,
        /// Notes stored with the generated codes
        #[arg(long)]
        notes: Option<String>,
        /// Days until the codes expire (default: 30)
        #[arg(long)]
        days: Option<i64>,
        /// Hand the codes to this user id instead of the administrator
        #[arg(long, value_name = "USER_ID")]
        for_user: Option<i64>,
    },
    /// List invitation codes, newest first
    List {
        /// Number of codes to list
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(i64).range(0..))]
        limit: i64,
        /// Number of codes to skip
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..))]
        offset: i64,
        /// Only the codes created by this id, with their counters (ignores paging)
        #[arg(long, value_name = "ID")]
        created_by: Option<i64>,
        /// Creator type used with --created-by (admin or user)
        #[arg(long, default_value = "user", requires = "created_by")]
        creator_type: CreatorType,
        /// Include used codes
        #[arg(long, default_value_t = false)]
        include_used: bool,
        /// Print JSON instead of one line per code
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show invitation code counters
    Stats {
        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_command_is_seed() {
        let args = Args::try_parse_from(["register-admin"]).unwrap();
        assert_eq!(args.cmd.unwrap_or_default(), Command::SeedReviewCodes);
    }

    #[test]
    fn test_parse_generate() {
        let args =
            Args::try_parse_from(["register-admin", "generate", "-n", "5", "--notes", "batch"])
                .unwrap();
        assert_eq!(
            args.cmd,
            Some(Command::Generate {
                count: 5,
                notes: Some("batch".to_string()),
                days: None,
                for_user: None,
            })
        );
    }

    #[test]
    fn test_parse_list_flags() {
        let args =
            Args::try_parse_from(["register-admin", "list", "--limit", "5", "--include-used"])
                .unwrap();
        assert_eq!(
            args.cmd,
            Some(Command::List {
                limit: 5,
                offset: 0,
                created_by: None,
                creator_type: CreatorType::User,
                include_used: true,
                json: false,
            })
        );
    }

    #[test]
    fn test_parse_list_by_creator() {
        let args = Args::try_parse_from([
            "register-admin",
            "list",
            "--created-by",
            "42",
            "--creator-type",
            "admin",
        ])
        .unwrap();
        match args.cmd {
            Some(Command::List {
                created_by,
                creator_type,
                ..
            }) => {
                assert_eq!(created_by, Some(42));
                assert_eq!(creator_type, CreatorType::Admin);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let unknown_type = Args::try_parse_from([
            "register-admin",
            "list",
            "--created-by",
            "1",
            "--creator-type",
            "robot",
        ]);
        assert!(unknown_type.is_err());
    }

    #[test]
    fn test_list_rejects_negative_paging() {
        assert!(Args::try_parse_from(["register-admin", "list", "--limit=-1"]).is_err());
        assert!(Args::try_parse_from(["register-admin", "list", "--offset=-1"]).is_err());
        let zero = ["register-admin", "list", "--limit=0", "--offset=0"];
        assert!(Args::try_parse_from(zero).is_ok());
    }
}
