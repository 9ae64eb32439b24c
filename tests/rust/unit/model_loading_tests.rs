//! Unit tests for loading entity models from YAML

#[cfg(test)]
mod model_loading_tests {
    use std::io::Write;

    use navexpand::model::{CollectionKind, Model, ModelError};

    const MODEL: &str = r#"
entities:
  - name: Blog
    key: Id
    properties:
      - { name: Id, type: int32 }
  - name: Post
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: BlogId, type: int32, nullable: true }
relationships:
  - dependent: Post
    principal: Blog
    foreign_key: BlogId
    dependent_to_principal: Blog
    principal_to_dependent: Posts
    collection: set
"#;

    #[test]
    fn test_collection_shape_from_yaml() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let posts = model.find_navigation("Blog", "Posts").unwrap().unwrap();
        assert_eq!(posts.collection, Some(CollectionKind::Set));
        assert_eq!(posts.target_entity, "Post");
        let blog = model.find_navigation("Post", "Blog").unwrap().unwrap();
        assert!(!blog.is_collection());
        assert!(!blog.foreign_key.is_required);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", MODEL).unwrap();
        let model = Model::from_yaml_file(file.path()).unwrap();
        assert!(model.contains_entity("Blog"));
        assert!(model.contains_entity("Post"));
    }

    #[test]
    fn test_missing_file_reported() {
        let result = Model::from_yaml_file("/nonexistent/navexpand/model.yaml");
        assert!(matches!(result, Err(ModelError::ConfigReadError { .. })));
    }

    #[test]
    fn test_unknown_principal_rejected() {
        let yaml = MODEL.replace("principal: Blog", "principal: Journal");
        assert!(Model::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_primary_key_lookup() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let key = model.primary_key("Post").unwrap();
        assert_eq!(key.len(), 1);
        assert_eq!(key[0].name, "Id");
        assert!(matches!(
            model.primary_key("Comment"),
            Err(ModelError::UnknownEntity { .. })
        ));
    }
}
