mod util;

use std::time::Duration;

use personal_blog::auth::{TokenPurpose, TokenSigner};
use personal_blog::blog::forms::{
    LoginForm, RequestResetForm, ResetPasswordForm, UpdateAccountForm,
};
use personal_blog::blog::users::{ADMIN_DEACTIVATION_REJECTED, Deactivation, RESET_REQUESTED};
use personal_blog::blog::BlogError;
use personal_blog::model::types::DEFAULT_PROFILE_PIC;
use personal_blog::search::client::IndexClient;
use personal_blog::storage::SqliteStorage;

use util::{SECRET, TestBlog, post_form, registration};

fn login(email: &str, password: &str) -> LoginForm {
    LoginForm {
        email: email.into(),
        password: password.into(),
        remember: false,
    }
}

#[test]
fn only_the_first_registration_is_admin() {
    let t = TestBlog::new(IndexClient::disabled());
    let first = t.register("first");
    let second = t.register("second");
    let third = t.register("third");
    assert!(first.is_admin);
    assert!(!second.is_admin);
    assert!(!third.is_admin);
    assert_eq!(t.db_count("SELECT COUNT(*) FROM user WHERE is_admin = 1"), 1);
}

#[test]
fn concurrent_first_registrations_yield_one_admin() {
    let t = TestBlog::new(IndexClient::disabled());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let blog = t.blog.clone();
            std::thread::spawn(move || blog.register(&registration(&format!("racer{i}"), "secret-pw")))
        })
        .collect();
    let admins = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .filter(|u| u.is_admin)
        .count();
    assert_eq!(admins, 1);
}

#[test]
fn duplicate_username_and_email_are_field_errors() {
    let t = TestBlog::new(IndexClient::disabled());
    t.register("alice");
    let err = t
        .blog
        .register(&registration("alice", "another"))
        .unwrap_err();
    let BlogError::Validation(fields) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(fields.field("username"), ["Username is already taken!"]);
    assert_eq!(fields.field("email"), ["Email is already taken!"]);
}

#[test]
fn login_checks_the_password() {
    let t = TestBlog::new(IndexClient::disabled());
    let user = t.register("alice");
    let ok = t.blog.login(&login("alice@example.com", "secret-pw")).unwrap();
    assert_eq!(ok.user.id, user.id);
    assert_eq!(t.blog.session_user(&ok.token).unwrap().unwrap().id, user.id);

    let err = t
        .blog
        .login(&login("alice@example.com", "wrong-pw"))
        .unwrap_err();
    assert!(matches!(err, BlogError::BadCredentials));
    assert_eq!(err.to_string(), "Please enter the right credentials..");
    assert!(t.blog.session_user("garbage").unwrap().is_none());
}

#[test]
fn admin_cannot_deactivate() {
    let t = TestBlog::new(IndexClient::disabled());
    let admin = t.register("admin");
    let picture = t
        .blog
        .set_profile_picture(admin.id, "me.png", b"png")
        .unwrap()
        .profile_pic;
    let picture_path = t.blog.profile_pics().dir().join(&picture);

    let outcome = t.blog.deactivate(admin.id).unwrap();
    assert_eq!(
        outcome,
        Deactivation::Rejected {
            message: ADMIN_DEACTIVATION_REJECTED
        }
    );
    assert_eq!(t.blog.user(admin.id).unwrap().profile_pic, picture);
    assert!(picture_path.exists());
}

#[test]
fn deactivation_removes_user_content_and_picture() {
    let t = TestBlog::new(IndexClient::disabled());
    let admin = t.register("admin");
    let reader = t.register("reader");
    let post = t
        .blog
        .create_post(admin.id, &post_form("T", "x", "body"))
        .unwrap()
        .post;
    t.blog
        .comment(reader.id, post.id, &personal_blog::blog::forms::CommentForm {
            content: "hi".into(),
        })
        .unwrap();
    let picture = t
        .blog
        .set_profile_picture(reader.id, "me.jpg", b"jpg")
        .unwrap()
        .profile_pic;

    assert_eq!(t.blog.deactivate(reader.id).unwrap(), Deactivation::Deactivated);
    assert!(matches!(t.blog.user(reader.id), Err(BlogError::NotFound)));
    assert_eq!(t.db_count("SELECT COUNT(*) FROM comment"), 0);
    assert!(!t.blog.profile_pics().dir().join(picture).exists());
}

#[test]
fn replacing_profile_picture_deletes_the_old_one() {
    let t = TestBlog::new(IndexClient::disabled());
    let user = t.register("alice");
    let first = t.blog.set_profile_picture(user.id, "a.png", b"1").unwrap().profile_pic;
    let second = t.blog.set_profile_picture(user.id, "b.jpeg", b"2").unwrap().profile_pic;
    assert_ne!(first, second);
    assert!(!t.blog.profile_pics().dir().join(first).exists());
    assert!(t.blog.profile_pics().dir().join(second).exists());
    assert!(matches!(
        t.blog.set_profile_picture(user.id, "anim.gif", b"3"),
        Err(BlogError::Upload(_))
    ));
}

#[test]
fn failed_picture_update_leaves_no_stray_file() {
    let t = TestBlog::new(IndexClient::disabled());
    let user = t.register("pictured");

    let other = SqliteStorage::open(&t.dir.path().join("blog.db")).unwrap();
    other
        .raw()
        .execute_batch(
            "CREATE TRIGGER user_locked BEFORE UPDATE ON user
             BEGIN SELECT RAISE(ABORT, 'user table locked'); END;",
        )
        .unwrap();

    let err = t
        .blog
        .set_profile_picture(user.id, "me.png", b"png")
        .unwrap_err();
    assert!(matches!(err, BlogError::Internal(_)), "{err:?}");

    let stored = std::fs::read_dir(t.blog.profile_pics().dir()).unwrap().count();
    assert_eq!(stored, 0);
    assert_eq!(
        t.blog.user(user.id).unwrap().profile_pic,
        DEFAULT_PROFILE_PIC
    );
}

#[test]
fn account_update_allows_keeping_own_name() {
    let t = TestBlog::new(IndexClient::disabled());
    let alice = t.register("alice");
    t.register("bobby");
    let same = UpdateAccountForm {
        username: "alice".into(),
        email: "alice@new.example.com".into(),
    };
    assert_eq!(
        t.blog.update_account(alice.id, &same).unwrap().email,
        "alice@new.example.com"
    );

    let taken = UpdateAccountForm {
        username: "bobby".into(),
        email: "alice@new.example.com".into(),
    };
    assert!(matches!(
        t.blog.update_account(alice.id, &taken),
        Err(BlogError::Validation(_))
    ));
}

#[test]
fn password_reset_round_trip() {
    let t = TestBlog::new(IndexClient::disabled());
    let user = t.register("alice");

    let unknown = RequestResetForm {
        email: "nobody@example.com".into(),
    };
    assert_eq!(t.blog.request_password_reset(&unknown).unwrap(), RESET_REQUESTED);

    let known = RequestResetForm {
        email: "alice@example.com".into(),
    };
    assert_eq!(t.blog.request_password_reset(&known).unwrap(), RESET_REQUESTED);
    let mail = t.next_mail();
    assert_eq!(mail.recipients, vec!["alice@example.com"]);
    assert_eq!(mail.sender, "admin@blog.com");
    let link = mail
        .body
        .lines()
        .find(|l| l.contains("/reset_password/"))
        .unwrap();
    let token = link.rsplit('/').next().unwrap();
    assert_eq!(t.blog.verify_reset_token(token).unwrap().id, user.id);

    t.blog
        .reset_password(
            token,
            &ResetPasswordForm {
                password: "new-secret".into(),
                confirm_password: "new-secret".into(),
            },
        )
        .unwrap();
    assert!(t.blog.login(&login("alice@example.com", "new-secret")).is_ok());
    assert!(t.blog.login(&login("alice@example.com", "secret-pw")).is_err());
    // Only the known address produced mail.
    assert!(t.mail.try_recv().is_err());
}

#[test]
fn reset_tokens_resolve_expire_and_bind_to_the_secret() {
    let t = TestBlog::new(IndexClient::disabled());
    let user = t.register("alice");

    let signer = TokenSigner::new(SECRET);
    let fresh = signer.sign(user.id, TokenPurpose::PasswordReset, Duration::from_secs(600));
    assert_eq!(t.blog.verify_reset_token(&fresh).unwrap().id, user.id);

    let expired = signer.sign_at(user.id, TokenPurpose::PasswordReset, Duration::from_secs(600), 0);
    assert!(matches!(
        t.blog.verify_reset_token(&expired),
        Err(BlogError::InvalidToken)
    ));

    let foreign = TokenSigner::new(b"another-secret").sign(
        user.id,
        TokenPurpose::PasswordReset,
        Duration::from_secs(600),
    );
    assert!(matches!(
        t.blog.verify_reset_token(&foreign),
        Err(BlogError::InvalidToken)
    ));

    let session = signer.sign(user.id, TokenPurpose::Session, Duration::from_secs(600));
    assert!(matches!(
        t.blog.verify_reset_token(&session),
        Err(BlogError::InvalidToken)
    ));
}
