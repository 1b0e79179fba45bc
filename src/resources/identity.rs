//! User directory, public app client, and hosted login domain.

use crate::core::error::Result;
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{CfnResource, Handle};
use serde_json::json;

pub const ID_TOKEN_VALIDITY_MINUTES: u32 = 24 * 60;
pub const ACCESS_TOKEN_VALIDITY_MINUTES: u32 = 24 * 60;
pub const REFRESH_TOKEN_VALIDITY_MINUTES: u32 = 30 * 24 * 60;
pub const OAUTH_SCOPES: [&str; 3] = ["email", "openid", "profile"];

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_pool: Handle,
    pub client: Handle,
    pub domain: Handle,
    pub domain_prefix: String,
    /// `https://{prefix}.auth.{region}.amazoncognito.com`
    pub hosted_ui_url: String,
}

pub fn declare_identity(stack: &mut Stack) -> Result<Identity> {
    let identity = stack.config().identity.clone();
    let prefix = stack.prefix().to_string();
    let domain_prefix = naming::domain_prefix(stack.config())?;

    let user_pool = stack.declare(
        "CodeRefactorUserPool",
        CfnResource::new("AWS::Cognito::UserPool")
            .prop("UserPoolName", format!("{}-user-pool", prefix))
            .prop(
                "AdminCreateUserConfig",
                json!({"AllowAdminCreateUserOnly": false}),
            )
            .prop("AliasAttributes", json!(["email"]))
            .prop("AutoVerifiedAttributes", json!(["email"]))
            .prop(
                "Policies",
                json!({
                    "PasswordPolicy": {
                        "MinimumLength": identity.password_min_length,
                        "RequireLowercase": true,
                        "RequireUppercase": true,
                        "RequireNumbers": true,
                        "RequireSymbols": true,
                    }
                }),
            )
            .prop(
                "AccountRecoverySetting",
                json!({"RecoveryMechanisms": [{"Name": "verified_email", "Priority": 1}]}),
            )
            .prop(
                "VerificationMessageTemplate",
                json!({"DefaultEmailOption": "CONFIRM_WITH_CODE"}),
            )
            .destroy_on_removal(),
    )?;

    let client = stack.declare(
        "CodeRefactorUserPoolClient",
        CfnResource::new("AWS::Cognito::UserPoolClient")
            .prop("UserPoolId", user_pool.reference())
            .prop("ClientName", format!("{}-client", prefix))
            .prop("GenerateSecret", false)
            .prop(
                "ExplicitAuthFlows",
                json!([
                    "ALLOW_USER_PASSWORD_AUTH",
                    "ALLOW_USER_SRP_AUTH",
                    "ALLOW_REFRESH_TOKEN_AUTH"
                ]),
            )
            .prop("AllowedOAuthFlowsUserPoolClient", true)
            .prop("AllowedOAuthFlows", json!(["code", "implicit"]))
            .prop("AllowedOAuthScopes", json!(OAUTH_SCOPES))
            .prop("CallbackURLs", json!(identity.callback_urls))
            .prop("LogoutURLs", json!(identity.logout_urls))
            .prop("SupportedIdentityProviders", json!(["COGNITO"]))
            .prop("IdTokenValidity", ID_TOKEN_VALIDITY_MINUTES)
            .prop("AccessTokenValidity", ACCESS_TOKEN_VALIDITY_MINUTES)
            .prop("RefreshTokenValidity", REFRESH_TOKEN_VALIDITY_MINUTES)
            .prop(
                "TokenValidityUnits",
                json!({
                    "IdToken": "minutes",
                    "AccessToken": "minutes",
                    "RefreshToken": "minutes",
                }),
            )
            .destroy_on_removal(),
    )?;

    let domain = stack.declare(
        "CodeRefactorUserPoolDomain",
        CfnResource::new("AWS::Cognito::UserPoolDomain")
            .prop("Domain", domain_prefix.as_str())
            .prop("UserPoolId", user_pool.reference())
            .destroy_on_removal(),
    )?;

    let hosted_ui_url = naming::hosted_ui_url(&domain_prefix, stack.region());
    tracing::info!(domain = %domain_prefix, "identity declared");

    Ok(Identity {
        user_pool,
        client,
        domain,
        domain_prefix,
        hosted_ui_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StackConfig;

    fn build() -> (Stack, Identity) {
        let config: StackConfig = serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap();
        let mut stack = Stack::new(&config);
        let id = declare_identity(&mut stack).unwrap();
        (stack, id)
    }

    #[test]
    fn test_domain_prefix_and_url() {
        let (stack, id) = build();
        assert_eq!(id.domain_prefix, "code-refactor-123456789012");
        assert_eq!(
            id.hosted_ui_url,
            "https://code-refactor-123456789012.auth.us-east-1.amazoncognito.com"
        );
        assert_eq!(
            stack.template().resources["CodeRefactorUserPoolDomain"].properties["Domain"],
            "code-refactor-123456789012"
        );
    }

    #[test]
    fn test_password_policy() {
        let (stack, id) = build();
        let p = &stack.template().resources[id.user_pool.logical_id()].properties;
        let policy = &p["Policies"]["PasswordPolicy"];
        assert_eq!(policy["MinimumLength"], 8);
        for key in ["RequireLowercase", "RequireUppercase", "RequireNumbers", "RequireSymbols"] {
            assert_eq!(policy[key], true, "{} not required", key);
        }
        assert_eq!(p["AdminCreateUserConfig"]["AllowAdminCreateUserOnly"], false);
        assert_eq!(
            p["AccountRecoverySetting"]["RecoveryMechanisms"][0]["Name"],
            "verified_email"
        );
    }

    #[test]
    fn test_client_is_public_with_fixed_lifetimes() {
        let (stack, id) = build();
        let p = &stack.template().resources[id.client.logical_id()].properties;
        assert_eq!(p["GenerateSecret"], false);
        assert_eq!(p["IdTokenValidity"], 1440);
        assert_eq!(p["AccessTokenValidity"], 1440);
        assert_eq!(p["RefreshTokenValidity"], 43200);
        assert_eq!(p["AllowedOAuthScopes"], json!(["email", "openid", "profile"]));
        assert_eq!(p["CallbackURLs"][0], "https://localhost:3000/callback");
    }

    #[test]
    fn test_user_pool_tags_use_map() {
        let (stack, id) = build();
        let p = &stack.template().resources[id.user_pool.logical_id()].properties;
        assert_eq!(p["UserPoolTags"]["Project"], "code-refactor");
    }
}
