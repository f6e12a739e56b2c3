#[cfg(test)]
mod tests {
    use std::fs;

    use crate::database::{SeedSet, Whitelist, WhitelistRegistry};
    use crate::error::AppError;

    fn seed_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).expect("Failed to write seed file");
        }
        dir
    }

    #[test]
    fn test_refresh_lists_every_seed_header() {
        let dir = seed_dir(&[
            ("students.csv", "student_id,name,contact\n1,Kim,\n"),
            ("rehearsals.csv", "\u{feff}rehearsal_id,date\n"),
        ]);
        let registry = WhitelistRegistry::new();

        registry
            .refresh(&SeedSet::new(dir.path()))
            .expect("Failed to refresh whitelist");

        for table in ["students", "rehearsals"] {
            assert!(registry.is_valid_table(table), "{} should be valid", table);
        }
        for column in ["student_id", "name", "contact", "rehearsal_id", "date"] {
            assert!(registry.is_valid_column(column), "{} should be valid", column);
        }
        assert!(!registry.is_valid_table("users"));
        assert!(!registry.is_valid_column("password"));
        assert!(!registry.is_valid_column("students"));
    }

    #[test]
    fn test_clones_observe_refresh() {
        let dir = seed_dir(&[("sections.csv", "section_id,section_name\n")]);
        let registry = WhitelistRegistry::new();
        let handle = registry.clone();

        assert!(!handle.is_valid_table("sections"));
        registry
            .refresh(&SeedSet::new(dir.path()))
            .expect("Failed to refresh whitelist");
        assert!(handle.is_valid_table("sections"));

        fs::remove_file(dir.path().join("sections.csv")).expect("Failed to remove seed");
        fs::write(dir.path().join("users.csv"), "username,password\n").expect("Failed to write seed");
        registry
            .refresh(&SeedSet::new(dir.path()))
            .expect("Failed to refresh whitelist");

        assert!(!handle.is_valid_table("sections"));
        assert!(handle.is_valid_table("users"));
        assert!(!handle.is_valid_column("section_name"));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_refresh() {
        let dir = seed_dir(&[("sections.csv", "section_id,section_name\n")]);
        let registry = WhitelistRegistry::new();
        registry
            .refresh(&SeedSet::new(dir.path()))
            .expect("Failed to refresh whitelist");

        let snapshot = registry.snapshot();
        registry.replace(Whitelist::default());

        assert!(snapshot.is_valid_table("sections"));
        assert!(!registry.is_valid_table("sections"));
    }

    #[test]
    fn test_missing_seed_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let registry = WhitelistRegistry::new();

        let result = registry.refresh(&SeedSet::new(dir.path().join("absent")));

        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[test]
    fn test_identifier_errors_name_the_offender() {
        let whitelist = Whitelist::with_names(&["students"], &["name"]);

        match whitelist.column("name; --") {
            Err(AppError::InvalidIdentifier(name)) => assert_eq!(name, "name; --"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            whitelist.table_names(),
            vec!["students".to_string()]
        );
    }
}
